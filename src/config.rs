use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::PipelineSettings;

fn default_worker_concurrency() -> usize {
    5
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_storage_timeout_secs() -> u64 {
    30
}

fn default_transcription_timeout_secs() -> u64 {
    60
}

fn default_language() -> String {
    "en".to_string()
}

/// Transcription backend configuration (maps to [transcription] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    /// HTTP endpoint of the speech-to-text service
    pub endpoint: String,
}

/// Service configuration file structure
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// Path of the SQLite database file
    pub database_path: PathBuf,
    /// Root directory for stored audio objects
    pub storage_dir: PathBuf,
    /// Number of concurrent pipeline workers (default: 5)
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// TTL for cached waveforms and analyses in seconds (default: 300)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Attempts per job including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Timeout for object storage calls in seconds (default: 30)
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
    /// Timeout for transcription calls in seconds (default: 60)
    #[serde(default = "default_transcription_timeout_secs")]
    pub transcription_timeout_secs: u64,
    /// Language code passed to the transcription backend (default: "en")
    #[serde(default = "default_language")]
    pub language: String,
    /// Transcription backend; omit the section to run without one
    pub transcription: Option<TranscriptionConfig>,
}

impl ServiceConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
        let config: ServiceConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_concurrency == 0 {
            return Err("worker_concurrency must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.cache_ttl_secs == 0 {
            return Err("cache_ttl_secs must be positive".to_string());
        }
        if let Some(transcription) = &self.transcription {
            if transcription.endpoint.trim().is_empty() {
                return Err(
                    "[transcription] section is present but endpoint is empty".to_string()
                );
            }
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            language: self.language.clone(),
            storage_timeout: Duration::from_secs(self.storage_timeout_secs),
            transcription_timeout: Duration::from_secs(self.transcription_timeout_secs),
            max_attempts: self.max_attempts,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
