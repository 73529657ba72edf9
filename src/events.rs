//! Lifecycle event emitter.
//!
//! Fire-and-forget broadcast of JSON payloads. Notification and analytics
//! consumers subscribe if present; an absent consumer is a valid state and
//! never blocks the pipeline.

use chrono::Utc;
use log::debug;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const RECORDING_UPLOADED: &str = "recording-uploaded";
pub const RECORDING_DELETED: &str = "recording-deleted";
pub const PROCESSING_PROGRESS: &str = "processing-progress";
pub const PROCESSING_COMPLETED: &str = "processing-completed";
pub const PROCESSING_FAILED: &str = "processing-failed";

#[derive(Debug, Clone)]
pub struct Event {
    pub name: &'static str,
    pub payload: Value,
}

#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventEmitter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event. Errors (no active subscriber) are ignored.
    pub fn emit(&self, name: &'static str, mut payload: Value) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("emitted_at".to_string(), json!(Utc::now()));
        }
        debug!("Event {}: {}", name, payload);
        let _ = self.tx.send(Event { name, payload });
    }

    pub fn emit_recording(&self, name: &'static str, recording_id: Uuid, user_id: &str) {
        self.emit(
            name,
            json!({
                "recording_id": recording_id,
                "user_id": user_id,
            }),
        );
    }

    pub fn emit_progress(&self, recording_id: Uuid, progress: u8) {
        self.emit(
            PROCESSING_PROGRESS,
            json!({
                "recording_id": recording_id,
                "progress": progress,
            }),
        );
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        EventEmitter::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let emitter = EventEmitter::default();
        let mut rx = emitter.subscribe();

        let id = Uuid::new_v4();
        emitter.emit_recording(RECORDING_UPLOADED, id, "user-1");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, RECORDING_UPLOADED);
        assert_eq!(event.payload["user_id"], "user-1");
        assert!(event.payload.get("emitted_at").is_some());
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = EventEmitter::default();
        emitter.emit_progress(Uuid::new_v4(), 55);
    }
}
