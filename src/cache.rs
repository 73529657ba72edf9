//! Short-TTL cache for derived artifacts (waveforms, analysis results).
//!
//! Best-effort: a miss is never fatal, values are idempotently recomputable,
//! and writes are last-writer-wins.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

struct Entry {
    expires_at: Instant,
    value: Value,
}

pub struct TtlCache {
    entries: DashMap<String, Entry>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        TtlCache {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn waveform_key(recording_id: Uuid) -> String {
        format!("waveform:{}", recording_id)
    }

    pub fn analysis_key(recording_id: Uuid) -> String {
        format!("analysis:{}", recording_id)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every cached artifact derived from one recording. Called on
    /// delete and on reprocess.
    pub fn invalidate_recording(&self, recording_id: Uuid) {
        self.delete(&Self::waveform_key(recording_id));
        self.delete(&Self::analysis_key(recording_id));
    }

    /// Remove expired entries. Callers may run this periodically; reads
    /// already treat expired entries as misses.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_returns_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("waveform:x", json!([0.1, 0.2]));
        assert_eq!(cache.get("waveform:x"), Some(json!([0.1, 0.2])));
    }

    #[test]
    fn expired_entries_read_as_miss() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("k", json!(1), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn invalidate_recording_clears_both_namespaces() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.set(&TtlCache::waveform_key(id), json!([0.5]));
        cache.set(&TtlCache::analysis_key(id), json!({"overall_score": 90}));

        cache.invalidate_recording(id);

        assert_eq!(cache.get(&TtlCache::waveform_key(id)), None);
        assert_eq!(cache.get(&TtlCache::analysis_key(id)), None);
    }

    #[test]
    fn evict_expired_drops_only_stale_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("stale", json!(1), Duration::from_millis(0));
        cache.set("fresh", json!(2));
        std::thread::sleep(Duration::from_millis(5));

        cache.evict_expired();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }
}
