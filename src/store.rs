//! Recording store: persistence for sessions and recordings.
//!
//! SQL text is built by the `queries` module and executed through sqlx, so
//! the statements stay greppable in one place.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{AnalysisResult, AudioFormat, Recording, RecordingStatus};
use crate::queries::recordings::{self, DerivedUpdates};
use crate::queries::sessions;

#[derive(Clone)]
pub struct RecordingStore {
    pool: SqlitePool,
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_uuid(s: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(s).map_err(|e| PipelineError::processing("malformed id in database", e))
}

fn row_to_recording(row: &SqliteRow) -> Result<Recording, PipelineError> {
    let id: String = row.try_get("id")?;
    let session_id: String = row.try_get("session_id")?;
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("status")?;
    let waveform_json: Option<String> = row.try_get("waveform_json")?;
    let analysis_json: Option<String> = row.try_get("analysis_json")?;
    let file_size: i64 = row.try_get("file_size")?;
    let created_at: i64 = row.try_get("created_at")?;
    let processed_at: Option<i64> = row.try_get("processed_at")?;

    let waveform_data = waveform_json
        .as_deref()
        .map(serde_json::from_str::<Vec<f32>>)
        .transpose()
        .map_err(|e| PipelineError::processing("corrupt waveform_json", e))?;
    let analysis_result = analysis_json
        .as_deref()
        .map(serde_json::from_str::<AnalysisResult>)
        .transpose()
        .map_err(|e| PipelineError::processing("corrupt analysis_json", e))?;

    Ok(Recording {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id")?,
        session_id: parse_uuid(&session_id)?,
        sentence_index: row.try_get("sentence_index")?,
        sentence_start_time: row.try_get("sentence_start_time")?,
        sentence_end_time: row.try_get("sentence_end_time")?,
        audio_url: row.try_get("audio_url")?,
        format: AudioFormat::parse(&format)
            .ok_or_else(|| PipelineError::UnsupportedFormat(format.clone()))?,
        duration_secs: row.try_get("duration_secs")?,
        file_size: file_size as u64,
        waveform_data,
        transcription: row.try_get("transcription")?,
        transcription_confidence: row.try_get("transcription_confidence")?,
        quality_score: row.try_get("quality_score")?,
        analysis_result,
        status: RecordingStatus::parse(&status)
            .ok_or_else(|| PipelineError::Processing(format!("unknown status '{}'", status)))?,
        error: row.try_get("error")?,
        created_at: ms_to_datetime(created_at),
        processed_at: processed_at.map(ms_to_datetime),
    })
}

impl RecordingStore {
    pub fn new(pool: SqlitePool) -> Self {
        RecordingStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ----- sessions -----

    pub async fn create_session(&self, user_id: &str) -> Result<Uuid, PipelineError> {
        let id = Uuid::new_v4();
        let sql = sessions::insert(id, user_id, Utc::now().timestamp_millis());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(id)
    }

    /// Owner of a session, or None if the session does not exist.
    pub async fn session_owner(&self, session_id: Uuid) -> Result<Option<String>, PipelineError> {
        let sql = sessions::select_owner(session_id);
        Ok(sqlx::query_scalar(&sql).fetch_optional(&self.pool).await?)
    }

    // ----- recordings -----

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_recording(
        &self,
        user_id: &str,
        session_id: Uuid,
        sentence_index: i64,
        sentence_start_time: f64,
        sentence_end_time: f64,
        format: AudioFormat,
        file_size: u64,
    ) -> Result<Recording, PipelineError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let sql = recordings::insert(
            id,
            user_id,
            session_id,
            sentence_index,
            sentence_start_time,
            sentence_end_time,
            format,
            file_size,
            created_at.timestamp_millis(),
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        Ok(Recording {
            id,
            user_id: user_id.to_string(),
            session_id,
            sentence_index,
            sentence_start_time,
            sentence_end_time,
            audio_url: String::new(),
            format,
            duration_secs: None,
            file_size,
            waveform_data: None,
            transcription: None,
            transcription_confidence: None,
            quality_score: None,
            analysis_result: None,
            status: RecordingStatus::Uploading,
            error: None,
            created_at,
            processed_at: None,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Recording>, PipelineError> {
        let sql = recordings::select_by_id(id);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_recording).transpose()
    }

    /// Fetch a recording owned by `user_id`. Unowned and missing recordings
    /// are indistinguishable to the caller.
    pub async fn get_owned(&self, user_id: &str, id: Uuid) -> Result<Recording, PipelineError> {
        match self.get(id).await? {
            Some(recording) if recording.user_id == user_id => Ok(recording),
            _ => Err(PipelineError::NotFound(format!("recording {}", id))),
        }
    }

    pub async fn list_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<Recording>, PipelineError> {
        let sql = recordings::select_by_session(session_id);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_recording).collect()
    }

    /// Record the storage locator and move to Processing.
    pub async fn mark_stored(&self, id: Uuid, audio_url: &str) -> Result<(), PipelineError> {
        let sql = recordings::mark_stored(id, audio_url);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Atomically apply all job updates and move to Completed.
    /// Returns false when the recording vanished (or left Processing) while
    /// the job ran; the caller discards its result in that case.
    pub async fn apply_completion(
        &self,
        id: Uuid,
        updates: &DerivedUpdates,
    ) -> Result<bool, PipelineError> {
        let sql = recordings::apply_completion(id, updates, Utc::now().timestamp_millis());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), PipelineError> {
        let sql = recordings::mark_failed(id, error);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Move a Completed/Failed recording back to Processing, clearing prior
    /// derived artifacts. Returns false if the recording no longer exists.
    pub async fn mark_reprocessing(&self, id: Uuid) -> Result<bool, PipelineError> {
        let sql = recordings::mark_reprocessing(id);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_analysis(
        &self,
        id: Uuid,
        analysis: &AnalysisResult,
    ) -> Result<(), PipelineError> {
        let analysis_json = serde_json::to_string(analysis)
            .map_err(|e| PipelineError::processing("serialize analysis", e))?;
        let sql = recordings::update_analysis(id, analysis.overall_score, &analysis_json);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Delete a recording row. Idempotent: deleting a missing row returns
    /// false rather than erroring.
    pub async fn delete(&self, id: Uuid) -> Result<bool, PipelineError> {
        let sql = recordings::delete_by_id(id);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    // ----- usage aggregates for the quota evaluator -----

    /// Recordings created by the user since UTC midnight.
    pub async fn daily_count(&self, user_id: &str) -> Result<i64, PipelineError> {
        let now_ms = Utc::now().timestamp_millis();
        let midnight = now_ms - now_ms.rem_euclid(86_400_000);
        let sql = recordings::count_since(user_id, midnight);
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    /// Total bytes of stored recordings for the user.
    pub async fn storage_bytes(&self, user_id: &str) -> Result<u64, PipelineError> {
        let sql = recordings::sum_file_size(user_id);
        let sum: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(sum.unwrap_or(0) as u64)
    }
}
