//! Queue processor: bounded worker pool driving recordings through their
//! operation lists.
//!
//! Workers run independently, but at most one job per recording is active at
//! a time; a job whose recording is already in flight is re-queued after a
//! short delay. Transient failures retry the whole job with banded backoff;
//! everything else fails the recording immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::constants::generate_object_suffix;
use crate::error::PipelineError;
use crate::events::{self, EventEmitter};
use crate::model::{AnalysisResult, AudioFormat, Operation, ProcessingJob, Recording, Transcript};
use crate::queries::recordings::DerivedUpdates;
use crate::scoring::{self, ScoringInput};
use crate::storage::ObjectStorage;
use crate::store::RecordingStore;
use crate::transcribe::TranscriptionBackend;
use crate::transform::{self, DecodedClip};

/// Delay before re-queueing a job whose recording already has one in flight.
const REQUEUE_DELAY: Duration = Duration::from_millis(250);

/// Calculate backoff delay based on the failed attempt number
fn get_backoff_ms(attempt: u32) -> u64 {
    match attempt {
        0..=1 => 500,  // 0.5s
        2 => 2000,     // 2s
        _ => 5000,     // 5s
    }
}

/// Runtime knobs for job execution.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Language code handed to the transcription backend.
    pub language: String,
    pub storage_timeout: Duration,
    pub transcription_timeout: Duration,
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            language: "en".to_string(),
            storage_timeout: Duration::from_secs(30),
            transcription_timeout: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

/// Everything a worker needs to execute a job. Shared across the pool.
pub struct PipelineContext {
    pub store: RecordingStore,
    pub storage: Arc<dyn ObjectStorage>,
    /// Absent backend is a valid state: transcribe operations are skipped.
    pub transcriber: Option<Arc<dyn TranscriptionBackend>>,
    pub cache: Arc<TtlCache>,
    pub events: EventEmitter,
    pub settings: PipelineSettings,
}

/// Handle for enqueueing jobs onto the worker pool.
#[derive(Clone)]
pub struct QueueProcessor {
    tx: mpsc::UnboundedSender<ProcessingJob>,
}

impl QueueProcessor {
    /// Spawn the dispatcher and worker pool.
    pub fn start(ctx: Arc<PipelineContext>, concurrency: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProcessingJob>();
        let requeue_tx = tx.clone();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let in_flight: Arc<DashMap<Uuid, ()>> = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                use dashmap::mapref::entry::Entry;

                match in_flight.entry(job.recording_id) {
                    Entry::Occupied(_) => {
                        // One active job per recording; try again shortly.
                        debug!("Recording {} busy, re-queueing job", job.recording_id);
                        let tx = requeue_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(REQUEUE_DELAY).await;
                            let _ = tx.send(job);
                        });
                        continue;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(());
                    }
                }

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let ctx = ctx.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let recording_id = job.recording_id;
                    process_job(&ctx, job).await;
                    in_flight.remove(&recording_id);
                    drop(permit);
                });
            }
            info!("Queue dispatcher stopped");
        });

        QueueProcessor { tx }
    }

    pub fn enqueue(&self, job: ProcessingJob) -> Result<(), PipelineError> {
        self.tx
            .send(job)
            .map_err(|_| PipelineError::Transient("processing queue is closed".to_string()))
    }
}

enum JobOutcome {
    Completed,
    /// The recording was deleted (or otherwise moved on) while the job ran;
    /// its result was discarded.
    RecordingGone,
}

/// Run one job to a terminal state, including retries and failure persist.
///
/// Public so tests and callers that manage their own scheduling can drive a
/// job without the pool.
pub async fn process_job(ctx: &PipelineContext, job: ProcessingJob) {
    let mut attempt = 1u32;
    loop {
        match execute_job(ctx, &job).await {
            Ok(JobOutcome::Completed) => {
                info!("Recording {} processed", job.recording_id);
                ctx.events.emit_recording(
                    events::PROCESSING_COMPLETED,
                    job.recording_id,
                    &job.user_id,
                );
                return;
            }
            Ok(JobOutcome::RecordingGone) => {
                debug!(
                    "Recording {} disappeared mid-job, result discarded",
                    job.recording_id
                );
                return;
            }
            Err(e) if e.is_retryable() && attempt < ctx.settings.max_attempts => {
                let backoff_ms = get_backoff_ms(attempt);
                warn!(
                    "Job for recording {} failed (attempt {}/{}): {}. Retrying in {}ms",
                    job.recording_id, attempt, ctx.settings.max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "Job for recording {} failed permanently: {}",
                    job.recording_id, e
                );
                let message = e.to_string();
                if let Err(persist_err) =
                    ctx.store.mark_failed(job.recording_id, &message).await
                {
                    warn!(
                        "Could not persist failure for recording {}: {}",
                        job.recording_id, persist_err
                    );
                }
                ctx.events.emit_recording(
                    events::PROCESSING_FAILED,
                    job.recording_id,
                    &job.user_id,
                );
                return;
            }
        }
    }
}

pub(crate) async fn with_timeout<T>(
    duration: Duration,
    context: &str,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Transient(format!(
            "{} timed out after {:?}",
            context, duration
        ))),
    }
}

/// Lazily decode the current audio bytes at most once per job. The tier's
/// duration cap is checked on the first decode, when the clip length is
/// measured for the first time.
fn ensure_decoded<'a>(
    clip: &'a mut Option<DecodedClip>,
    bytes: &[u8],
    format: AudioFormat,
    max_duration_secs: Option<u32>,
) -> Result<&'a mut DecodedClip, PipelineError> {
    let decoded = match clip.take() {
        Some(decoded) => decoded,
        None => {
            let decoded = transform::decode_to_mono(bytes, format)?;
            if let Some(limit) = max_duration_secs {
                let actual = decoded.duration_secs();
                if actual > limit as f64 {
                    return Err(PipelineError::DurationExceeded { actual, limit });
                }
            }
            decoded
        }
    };
    Ok(clip.insert(decoded))
}

/// One attempt at a job: download, run the operation list in order, persist
/// atomically. Accumulated updates are never written piecemeal, and an
/// artifact uploaded by a failed attempt never outlives it.
async fn execute_job(
    ctx: &PipelineContext,
    job: &ProcessingJob,
) -> Result<JobOutcome, PipelineError> {
    let started = Instant::now();
    let recording = match ctx.store.get(job.recording_id).await? {
        Some(recording) => recording,
        None => return Ok(JobOutcome::RecordingGone),
    };

    let bytes = with_timeout(
        ctx.settings.storage_timeout,
        "storage download",
        ctx.storage.get(&recording.audio_url),
    )
    .await?;

    let mut updates = DerivedUpdates::default();
    // Old artifact to remove once the replacement is durably persisted.
    let mut superseded_url: Option<String> = None;

    let analysis = match run_operations(
        ctx,
        job,
        &recording,
        bytes,
        &mut updates,
        &mut superseded_url,
    )
    .await
    {
        Ok(analysis) => analysis,
        Err(e) => {
            // A convert in this attempt may have uploaded a replacement
            // object before the failure; drop it so retries don't pile up
            // orphans that count against the owner's storage.
            if let Some(url) = &updates.audio_url {
                if let Err(delete_err) = ctx.storage.delete(url).await {
                    debug!(
                        "Could not remove artifact {} from failed attempt: {}",
                        url, delete_err
                    );
                }
            }
            return Err(e);
        }
    };

    // Atomic persist, guarded on the row still being in Processing.
    if !ctx.store.apply_completion(job.recording_id, &updates).await? {
        // Deleted mid-job: remove any artifact this run created and move on.
        if let Some(url) = &updates.audio_url {
            if let Err(e) = ctx.storage.delete(url).await {
                debug!("Could not remove orphaned artifact {}: {}", url, e);
            }
        }
        return Ok(JobOutcome::RecordingGone);
    }

    if let Some(analysis) = &analysis {
        ctx.store.update_analysis(job.recording_id, analysis).await?;
    }

    ctx.cache.invalidate_recording(job.recording_id);

    // The replaced artifact is only removed after the new locator is durable.
    if let Some(url) = superseded_url {
        match ctx.storage.delete(&url).await {
            Ok(()) | Err(PipelineError::NotFound(_)) => {}
            Err(e) => warn!("Could not delete superseded artifact {}: {}", url, e),
        }
    }

    debug!(
        "Recording {} job ran {} ops in {:?}",
        job.recording_id,
        job.operations.len(),
        started.elapsed()
    );
    Ok(JobOutcome::Completed)
}

/// Run the operation list in order, accumulating field updates. All stages
/// consume in-memory buffers; nothing is spilled to disk.
async fn run_operations(
    ctx: &PipelineContext,
    job: &ProcessingJob,
    recording: &Recording,
    bytes: Vec<u8>,
    updates: &mut DerivedUpdates,
    superseded_url: &mut Option<String>,
) -> Result<Option<AnalysisResult>, PipelineError> {
    let mut current_bytes = bytes;
    let mut current_format = recording.format;
    let mut clip: Option<DecodedClip> = None;
    let mut analysis: Option<AnalysisResult> = None;

    let total_ops = job.operations.len().max(1);
    for (done, operation) in job.operations.iter().enumerate() {
        match *operation {
            Operation::Convert { target } => {
                let decoded = ensure_decoded(
                    &mut clip,
                    &current_bytes,
                    current_format,
                    job.max_duration_secs,
                )?;
                updates.duration_secs = Some(decoded.duration_secs());
                let encoded = transform::convert(decoded, target)?;

                let key = format!(
                    "{}/{}-{}.{}",
                    job.user_id,
                    job.recording_id,
                    generate_object_suffix(),
                    target.as_str()
                );
                let url = with_timeout(
                    ctx.settings.storage_timeout,
                    "storage upload",
                    ctx.storage.put(&encoded, &key, target.content_type()),
                )
                .await?;

                if superseded_url.is_none() && url != recording.audio_url {
                    *superseded_url = Some(recording.audio_url.clone());
                }
                current_bytes = encoded;
                current_format = target;
                updates.audio_url = Some(url);
                updates.format = Some(target);
            }
            Operation::Normalize => {
                let decoded = ensure_decoded(
                    &mut clip,
                    &current_bytes,
                    current_format,
                    job.max_duration_secs,
                )?;
                let normalized = transform::normalize(decoded);
                updates.duration_secs = Some(normalized.duration_secs());
                clip = Some(normalized);
            }
            Operation::Denoise => {
                let decoded = ensure_decoded(
                    &mut clip,
                    &current_bytes,
                    current_format,
                    job.max_duration_secs,
                )?;
                let denoised = transform::denoise(decoded);
                clip = Some(denoised);
            }
            Operation::Waveform { resolution } => {
                let decoded = ensure_decoded(
                    &mut clip,
                    &current_bytes,
                    current_format,
                    job.max_duration_secs,
                )?;
                updates.duration_secs = Some(decoded.duration_secs());
                let waveform = transform::generate_waveform(decoded, resolution);
                updates.waveform_json = Some(
                    serde_json::to_string(&waveform)
                        .map_err(|e| PipelineError::processing("serialize waveform", e))?,
                );
            }
            Operation::Transcribe => match &ctx.transcriber {
                Some(backend) => {
                    let transcript = with_timeout(
                        ctx.settings.transcription_timeout,
                        "transcription",
                        backend.transcribe(&current_bytes, &ctx.settings.language),
                    )
                    .await?;
                    updates.transcription = Some(transcript.text);
                    updates.transcription_confidence = Some(transcript.confidence);
                }
                None => {
                    warn!(
                        "No transcription backend configured, skipping transcribe for {}",
                        job.recording_id
                    );
                }
            },
            Operation::Analyze => match &job.reference_text {
                Some(reference) => {
                    let transcript = updates
                        .transcription
                        .as_ref()
                        .map(|text| Transcript {
                            text: text.clone(),
                            confidence: updates.transcription_confidence.unwrap_or(0.0),
                        })
                        .or_else(|| {
                            recording.transcription.as_ref().map(|text| Transcript {
                                text: text.clone(),
                                confidence: recording
                                    .transcription_confidence
                                    .unwrap_or(0.0),
                            })
                        });
                    let input = ScoringInput {
                        transcript,
                        duration_secs: updates
                            .duration_secs
                            .or(recording.duration_secs)
                            .unwrap_or_else(|| recording.expected_duration()),
                        sentence_start_time: recording.sentence_start_time,
                        sentence_end_time: recording.sentence_end_time,
                    };
                    analysis = Some(scoring::compare(&input, reference));
                }
                None => {
                    warn!(
                        "Analyze requested without reference text, skipping for {}",
                        job.recording_id
                    );
                }
            },
        }

        let progress = 10 + (90 * (done + 1) / total_ops) as u8;
        ctx.events.emit_progress(job.recording_id, progress);
    }

    Ok(analysis)
}
