//! Upload gate and user-facing recording operations.
//!
//! [`PipelineService`] is the front door: quota-gated upload intake plus the
//! on-demand operations (waveform fetch, analysis, delete, reprocess). All
//! heavy work still happens on the queue; nothing here populates derived
//! artifacts synchronously.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::constants::DEFAULT_WAVEFORM_RESOLUTION;
use crate::error::PipelineError;
use crate::events;
use crate::model::{
    AnalysisResult, AudioFormat, Operation, ProcessingJob, Recording, RecordingStatus,
};
use crate::queue::{with_timeout, PipelineContext, QueueProcessor};
use crate::quota::{self, Tier};
use crate::scoring::{self, ScoringInput};
use crate::transform;

/// One upload attempt, exactly as received from the outer transport layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub user_id: String,
    pub session_id: Uuid,
    pub sentence_index: i64,
    /// Expected reference window, seconds.
    pub sentence_start_time: f64,
    pub sentence_end_time: f64,
    pub bytes: Vec<u8>,
    /// Mime-like tag declared by the client, e.g. "audio/mpeg".
    pub declared_format: String,
    /// Requested conversion target; a convert operation is only enqueued
    /// when this differs from the uploaded format.
    pub target_format: Option<AudioFormat>,
}

/// Requested waveform rendering.
#[derive(Debug, Clone)]
pub enum WaveformFormat {
    Json,
    Svg { color: String },
}

/// Waveform payload in the requested rendering.
#[derive(Debug, Clone)]
pub enum WaveformPayload {
    Json(Vec<f32>),
    Svg(String),
}

pub struct PipelineService {
    ctx: Arc<PipelineContext>,
    queue: QueueProcessor,
}

impl PipelineService {
    pub fn new(ctx: Arc<PipelineContext>, queue: QueueProcessor) -> Self {
        PipelineService { ctx, queue }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub async fn create_session(&self, user_id: &str) -> Result<Uuid, PipelineError> {
        self.ctx.store.create_session(user_id).await
    }

    pub async fn recording(&self, user_id: &str, id: Uuid) -> Result<Recording, PipelineError> {
        self.ctx.store.get_owned(user_id, id).await
    }

    pub async fn session_recordings(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> Result<Vec<Recording>, PipelineError> {
        match self.ctx.store.session_owner(session_id).await? {
            Some(owner) if owner == user_id => {
                self.ctx.store.list_by_session(session_id).await
            }
            _ => Err(PipelineError::NotFound(format!("session {}", session_id))),
        }
    }

    /// Quota-gated upload intake.
    ///
    /// Returns the recording in Processing state; derived artifacts arrive
    /// asynchronously (poll, or subscribe to `processing-completed`).
    pub async fn upload_recording(
        &self,
        tier: Tier,
        request: UploadRequest,
    ) -> Result<Recording, PipelineError> {
        let format = AudioFormat::parse(&request.declared_format)
            .ok_or_else(|| PipelineError::UnsupportedFormat(request.declared_format.clone()))?;

        match self.ctx.store.session_owner(request.session_id).await? {
            Some(owner) if owner == request.user_id => {}
            _ => {
                return Err(PipelineError::NotFound(format!(
                    "session {}",
                    request.session_id
                )))
            }
        }

        let limits = tier.limits();
        let file_size = request.bytes.len() as u64;
        if file_size > limits.max_file_size_bytes {
            return Err(PipelineError::FileTooLarge {
                actual: file_size,
                limit: limits.max_file_size_bytes,
            });
        }

        let daily_count = self.ctx.store.daily_count(&request.user_id).await?;
        let storage_bytes = self.ctx.store.storage_bytes(&request.user_id).await?;
        let snapshot = quota::evaluate(
            limits,
            daily_count,
            quota::bytes_to_gb(storage_bytes),
            Some(file_size),
            None,
        );
        if !snapshot.can_record {
            return Err(PipelineError::RecordingLimitExceeded(Box::new(snapshot)));
        }

        let recording = self
            .ctx
            .store
            .insert_recording(
                &request.user_id,
                request.session_id,
                request.sentence_index,
                request.sentence_start_time,
                request.sentence_end_time,
                format,
                file_size,
            )
            .await?;

        let key = format!("{}/{}.{}", request.user_id, recording.id, format.as_str());
        let url = match with_timeout(
            self.ctx.settings.storage_timeout,
            "storage upload",
            self.ctx
                .storage
                .put(&request.bytes, &key, format.content_type()),
        )
        .await
        {
            Ok(url) => url,
            Err(e) => {
                // The row exists but the payload never landed; surface that
                // on the recording instead of leaving it stuck in Uploading.
                let message = e.to_string();
                if let Err(persist_err) =
                    self.ctx.store.mark_failed(recording.id, &message).await
                {
                    warn!(
                        "Could not persist upload failure for {}: {}",
                        recording.id, persist_err
                    );
                }
                return Err(e);
            }
        };
        self.ctx.store.mark_stored(recording.id, &url).await?;

        let mut operations = Vec::new();
        if let Some(target) = request.target_format {
            if target != format {
                operations.push(Operation::Convert { target });
            }
        }
        operations.push(Operation::Waveform {
            resolution: DEFAULT_WAVEFORM_RESOLUTION,
        });
        operations.push(Operation::Transcribe);

        self.queue.enqueue(ProcessingJob {
            recording_id: recording.id,
            user_id: request.user_id.clone(),
            operations,
            reference_text: None,
            max_duration_secs: Some(limits.max_duration_secs),
        })?;

        self.ctx
            .events
            .emit_recording(events::RECORDING_UPLOADED, recording.id, &request.user_id);
        info!(
            "Recording {} uploaded ({} bytes, {})",
            recording.id,
            file_size,
            format.as_str()
        );

        let mut recording = recording;
        recording.audio_url = url;
        recording.status = RecordingStatus::Processing;
        Ok(recording)
    }

    /// Delete a recording and its stored audio. Safe to call while a job for
    /// it is in flight; the job detects the deletion at persist time.
    pub async fn delete_recording(&self, user_id: &str, id: Uuid) -> Result<(), PipelineError> {
        let recording = self.ctx.store.get_owned(user_id, id).await?;

        self.ctx.store.delete(id).await?;
        if !recording.audio_url.is_empty() {
            match self.ctx.storage.delete(&recording.audio_url).await {
                Ok(()) | Err(PipelineError::NotFound(_)) => {}
                Err(e) => warn!("Could not delete audio for {}: {}", id, e),
            }
        }
        self.ctx.cache.invalidate_recording(id);
        self.ctx
            .events
            .emit_recording(events::RECORDING_DELETED, id, user_id);
        info!("Recording {} deleted", id);
        Ok(())
    }

    /// Re-run the pipeline for a completed or failed recording. Success
    /// overwrites the prior derived artifacts.
    pub async fn reprocess_recording(
        &self,
        tier: Tier,
        user_id: &str,
        id: Uuid,
        operations: Vec<Operation>,
        reference_text: Option<String>,
    ) -> Result<(), PipelineError> {
        let recording = self.ctx.store.get_owned(user_id, id).await?;
        match recording.status {
            RecordingStatus::Completed | RecordingStatus::Failed => {}
            other => {
                return Err(PipelineError::InvalidRequest(format!(
                    "cannot reprocess a recording in {} state",
                    other.as_str()
                )))
            }
        }

        if !self.ctx.store.mark_reprocessing(id).await? {
            return Err(PipelineError::NotFound(format!("recording {}", id)));
        }
        self.ctx.cache.invalidate_recording(id);

        let operations = if operations.is_empty() {
            vec![
                Operation::Waveform {
                    resolution: DEFAULT_WAVEFORM_RESOLUTION,
                },
                Operation::Transcribe,
            ]
        } else {
            operations
        };
        self.queue.enqueue(ProcessingJob {
            recording_id: id,
            user_id: user_id.to_string(),
            operations,
            reference_text,
            max_duration_secs: Some(tier.limits().max_duration_secs),
        })?;
        Ok(())
    }

    /// Fetch (or recompute) the waveform for a recording, rendered as a JSON
    /// array or an SVG polyline.
    pub async fn get_waveform(
        &self,
        user_id: &str,
        id: Uuid,
        resolution: Option<usize>,
        format: WaveformFormat,
    ) -> Result<WaveformPayload, PipelineError> {
        let recording = self.ctx.store.get_owned(user_id, id).await?;
        let resolution =
            transform::clamp_resolution(resolution.unwrap_or(DEFAULT_WAVEFORM_RESOLUTION));

        let samples = match self.cached_waveform(id, resolution) {
            Some(samples) => samples,
            None => {
                let samples = self.compute_waveform(&recording, resolution).await?;
                let cached = serde_json::to_value(&samples)
                    .map_err(|e| PipelineError::processing("serialize waveform", e))?;
                self.ctx.cache.set(&TtlCache::waveform_key(id), cached);
                samples
            }
        };

        match format {
            WaveformFormat::Json => Ok(WaveformPayload::Json(samples)),
            WaveformFormat::Svg { color } => Ok(WaveformPayload::Svg(
                transform::render_waveform_svg(&samples, &color)?,
            )),
        }
    }

    fn cached_waveform(&self, id: Uuid, resolution: usize) -> Option<Vec<f32>> {
        let value = self.ctx.cache.get(&TtlCache::waveform_key(id))?;
        let samples: Vec<f32> = serde_json::from_value(value).ok()?;
        // A cached waveform at another resolution is a miss, not an answer.
        if samples.len() == resolution {
            debug!("Waveform cache hit for {}", id);
            Some(samples)
        } else {
            None
        }
    }

    async fn compute_waveform(
        &self,
        recording: &Recording,
        resolution: usize,
    ) -> Result<Vec<f32>, PipelineError> {
        if let Some(stored) = &recording.waveform_data {
            if stored.len() == resolution {
                return Ok(stored.clone());
            }
        }
        if recording.audio_url.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no audio stored for recording {}",
                recording.id
            )));
        }

        let bytes = with_timeout(
            self.ctx.settings.storage_timeout,
            "storage download",
            self.ctx.storage.get(&recording.audio_url),
        )
        .await?;
        let clip = transform::decode_to_mono(&bytes, recording.format)?;
        Ok(transform::generate_waveform(&clip, resolution))
    }

    /// On-demand scoring of a recording against reference text. Served from
    /// cache when a prior analysis is still fresh.
    pub async fn analyze_recording(
        &self,
        user_id: &str,
        id: Uuid,
        reference_text: &str,
    ) -> Result<AnalysisResult, PipelineError> {
        let recording = self.ctx.store.get_owned(user_id, id).await?;

        if let Some(value) = self.ctx.cache.get(&TtlCache::analysis_key(id)) {
            if let Ok(cached) = serde_json::from_value::<AnalysisResult>(value) {
                debug!("Analysis cache hit for {}", id);
                return Ok(cached);
            }
        }

        let input = ScoringInput::from_recording(&recording);
        let analysis = scoring::compare(&input, reference_text);

        self.ctx.store.update_analysis(id, &analysis).await?;
        let cached: Value = serde_json::to_value(&analysis)
            .map_err(|e| PipelineError::processing("serialize analysis", e))?;
        self.ctx.cache.set(&TtlCache::analysis_key(id), cached);
        Ok(analysis)
    }
}
