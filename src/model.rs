use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audio container/codec tags the pipeline understands.
///
/// Mp3/Aac/Wav are accepted as upload formats and decodable; Opus and Wav are
/// the supported conversion targets (Opus uploads cannot be decoded again, so
/// waveform extraction must run before a convert-to-opus in the operation
/// list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Wav,
    Opus,
}

impl AudioFormat {
    /// Parse a mime-like tag ("audio/mpeg", "mp3", ...) into a format.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "audio/mpeg" | "audio/mp3" | "mp3" => Some(AudioFormat::Mp3),
            "audio/aac" | "audio/aacp" | "audio/x-aac" | "aac" => Some(AudioFormat::Aac),
            "audio/wav" | "audio/x-wav" | "audio/wave" | "wav" => Some(AudioFormat::Wav),
            "audio/opus" | "audio/ogg" | "opus" => Some(AudioFormat::Opus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Wav => "wav",
            AudioFormat::Opus => "opus",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Opus => "audio/ogg",
        }
    }

    /// Whether the decoder stack can read this format back.
    pub fn is_decodable(&self) -> bool {
        !matches!(self, AudioFormat::Opus)
    }
}

/// Lifecycle state of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Uploading => "uploading",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(RecordingStatus::Uploading),
            "processing" => Some(RecordingStatus::Processing),
            "completed" => Some(RecordingStatus::Completed),
            "failed" => Some(RecordingStatus::Failed),
            _ => None,
        }
    }
}

/// One user utterance tied to one sentence of one practice session.
///
/// Derived artifacts (`waveform_data`, `transcription`, `quality_score`,
/// `analysis_result`) are only populated once a processing job reaches full
/// success; a recording in any other state carries none of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Uuid,
    pub sentence_index: i64,
    /// Expected reference window, seconds from the start of the transcript.
    pub sentence_start_time: f64,
    pub sentence_end_time: f64,
    /// Opaque storage locator for the current audio artifact.
    pub audio_url: String,
    pub format: AudioFormat,
    /// Clip length in seconds, measured during processing.
    pub duration_secs: Option<f64>,
    pub file_size: u64,
    pub waveform_data: Option<Vec<f32>>,
    pub transcription: Option<String>,
    pub transcription_confidence: Option<f64>,
    pub quality_score: Option<i64>,
    pub analysis_result: Option<AnalysisResult>,
    pub status: RecordingStatus,
    /// Present iff status is Failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Recording {
    /// Expected sentence duration from the reference window.
    pub fn expected_duration(&self) -> f64 {
        self.sentence_end_time - self.sentence_start_time
    }
}

/// Severity of an analysis issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

/// A single issue found while comparing a recording against reference text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: IssueSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub issue: String,
    pub suggestion: String,
}

/// Per-factor scores, each 0..=100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorScores {
    pub pronunciation: i64,
    pub fluency: i64,
    pub timing: i64,
    pub clarity: i64,
}

/// Transcription text with backend confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// Output of the comparison/scoring engine.
///
/// Invariant: `overall_score == round(0.4·pronunciation + 0.3·fluency +
/// 0.2·timing + 0.1·clarity)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub overall_score: i64,
    pub scores: FactorScores,
    pub issues: Vec<AnalysisIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<Transcript>,
    pub recommendations: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// One pipeline operation. A job carries an ordered list of these; order is
/// significant (a convert changes what later operations decode).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Convert { target: AudioFormat },
    Normalize,
    Denoise,
    Waveform { resolution: usize },
    Transcribe,
    Analyze,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Convert { .. } => "convert",
            Operation::Normalize => "normalize",
            Operation::Denoise => "denoise",
            Operation::Waveform { .. } => "waveform",
            Operation::Transcribe => "transcribe",
            Operation::Analyze => "analyze",
        }
    }
}

/// Ephemeral unit of queue work. Destroyed on completion/failure; results are
/// persisted onto the Recording, never onto the job.
///
/// `reference_text` is only consulted by the analyze operation; a job whose
/// operation list contains no analyze step ignores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub recording_id: Uuid,
    pub user_id: String,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub reference_text: Option<String>,
    /// Tier cap on clip length. The upload gate cannot measure duration
    /// before decode, so the worker enforces it once the clip is decoded.
    #[serde(default)]
    pub max_duration_secs: Option<u32>,
}

/// Current usage numbers backing a quota snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub daily_count: i64,
    pub total_storage_gb: f64,
}

/// Tier limits plus current usage, evaluated per upload attempt.
/// Never cached across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub max_duration_secs: u32,
    pub max_file_size_bytes: u64,
    /// -1 means unlimited.
    pub daily_limit: i64,
    pub storage_quota_gb: f64,
    pub current_usage: QuotaUsage,
    pub can_record: bool,
    /// First violated constraint, in priority order
    /// duration > size > daily > storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_reason: Option<String>,
}
