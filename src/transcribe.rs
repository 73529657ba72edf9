//! Transcription client.
//!
//! [`TranscriptionBackend`] is the pluggable interface to external
//! speech-to-text services. It is object-safe and `Send + Sync` so a backend
//! can be held behind `Arc<dyn TranscriptionBackend>` and shared across
//! worker tasks. An absent backend is a valid runtime state: the queue
//! processor skips the transcribe operation with a logged warning instead of
//! failing the job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::model::Transcript;

/// Object-safe interface to a speech-to-text backend.
///
/// # Contract
/// - `audio` is the encoded clip exactly as stored (not PCM).
/// - `language` is a BCP-47-ish language code, e.g. "en" or "es-MX".
/// - Returned confidence is clamped into [0, 1].
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: &str)
        -> Result<Transcript, PipelineError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TranscriptionBackend>) {}
};

/// HTTP speech-to-text backend.
///
/// POSTs the raw audio bytes to a configured endpoint and expects a JSON body
/// `{"text": "...", "confidence": 0.93}`. Network failures and non-success
/// statuses are transient (the queue retries the whole job); a malformed
/// response body is not.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl HttpTranscriber {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::transient("build transcription client", e))?;
        Ok(HttpTranscriber { client, endpoint })
    }
}

#[async_trait]
impl TranscriptionBackend for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
    ) -> Result<Transcript, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("language", language)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::transient("transcription request", e))?;

        if !response.status().is_success() {
            return Err(PipelineError::Transient(format!(
                "transcription backend returned {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::processing("transcription response", e))?;

        Ok(Transcript {
            text: body.text,
            confidence: body.confidence.clamp(0.0, 1.0),
        })
    }
}

/// Fixed-response backend for tests.
pub struct MockTranscriber {
    pub text: String,
    pub confidence: f64,
}

impl MockTranscriber {
    pub fn new(text: &str, confidence: f64) -> Self {
        MockTranscriber {
            text: text.to_string(),
            confidence,
        }
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _language: &str,
    ) -> Result<Transcript, PipelineError> {
        Ok(Transcript {
            text: self.text.clone(),
            confidence: self.confidence.clamp(0.0, 1.0),
        })
    }
}

/// Backend that always fails with a transient error, for retry tests.
pub struct FailingTranscriber;

#[async_trait]
impl TranscriptionBackend for FailingTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        _language: &str,
    ) -> Result<Transcript, PipelineError> {
        Err(PipelineError::Transient(
            "transcription backend unavailable".to_string(),
        ))
    }
}
