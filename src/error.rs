use thiserror::Error;

use crate::model::QuotaSnapshot;

/// All errors that can arise from the recording pipeline.
///
/// Each variant falls into one of the four classes the pipeline cares about:
/// validation errors (surfaced immediately, never retried), quota errors
/// (carry the full snapshot so callers can render an upgrade prompt),
/// transient infrastructure errors (retried with backoff by the queue
/// processor) and unrecoverable processing errors (fail the job at once).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The referenced entity does not exist or is not owned by the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The uploaded payload exceeds the tier's maximum file size.
    #[error("File too large: {actual} bytes exceeds the {limit} byte limit")]
    FileTooLarge { actual: u64, limit: u64 },

    /// The clip is longer than the tier's maximum recording duration.
    #[error("Recording too long: {actual:.1}s exceeds the {limit}s limit")]
    DurationExceeded { actual: f64, limit: u32 },

    /// The declared or detected audio format is not supported.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// A tier quota is exhausted. Carries the snapshot that was evaluated.
    #[error("Recording limit exceeded: {}", .0.limit_reason.as_deref().unwrap_or("quota"))]
    RecordingLimitExceeded(Box<QuotaSnapshot>),

    /// Malformed caller input (bad resolution, bad color, empty payload).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transient infrastructure failure (storage I/O, network, timeout).
    /// Eligible for retry by the queue processor.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Corrupt audio, decode failure or another permanent processing error.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Database failure. Treated as transient (pools reconnect).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    /// Whether the queue processor may retry the failed job.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_) | PipelineError::Database(_)
        )
    }

    /// A transient error from any displayable source.
    pub fn transient(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Transient(format!("{}: {}", context, err))
    }

    /// A permanent processing error from any displayable source.
    pub fn processing(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Processing(format!("{}: {}", context, err))
    }
}

// Compile-time assertion: the error must stay Send + Sync so it can cross
// worker task boundaries.
const _: fn() = || {
    fn _assert_send_sync<T: Send + Sync>() {}
    _assert_send_sync::<PipelineError>();
};
