use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};
use uuid::Uuid;

use crate::model::{AudioFormat, RecordingStatus};
use crate::schema::Recordings;

/// Derived-artifact field updates accumulated by a processing job and
/// persisted in one statement on full success.
#[derive(Debug, Default, Clone)]
pub struct DerivedUpdates {
    pub audio_url: Option<String>,
    pub format: Option<AudioFormat>,
    pub duration_secs: Option<f64>,
    pub waveform_json: Option<String>,
    pub transcription: Option<String>,
    pub transcription_confidence: Option<f64>,
}

/// INSERT INTO recordings (...) VALUES (...) for a fresh upload.
/// Derived artifact columns start NULL; status starts as 'uploading'.
#[allow(clippy::too_many_arguments)]
pub fn insert(
    id: Uuid,
    user_id: &str,
    session_id: Uuid,
    sentence_index: i64,
    sentence_start_time: f64,
    sentence_end_time: f64,
    format: AudioFormat,
    file_size: u64,
    created_at_ms: i64,
) -> String {
    Query::insert()
        .into_table(Recordings::Table)
        .columns([
            Recordings::Id,
            Recordings::UserId,
            Recordings::SessionId,
            Recordings::SentenceIndex,
            Recordings::SentenceStartTime,
            Recordings::SentenceEndTime,
            Recordings::AudioUrl,
            Recordings::Format,
            Recordings::FileSize,
            Recordings::Status,
            Recordings::CreatedAt,
        ])
        .values_panic([
            id.to_string().into(),
            user_id.into(),
            session_id.to_string().into(),
            sentence_index.into(),
            sentence_start_time.into(),
            sentence_end_time.into(),
            "".into(),
            format.as_str().into(),
            (file_size as i64).into(),
            RecordingStatus::Uploading.as_str().into(),
            created_at_ms.into(),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT * FROM recordings WHERE id = ?
pub fn select_by_id(id: Uuid) -> String {
    Query::select()
        .column(sea_query::Asterisk)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// SELECT * FROM recordings WHERE session_id = ? ORDER BY sentence_index
pub fn select_by_session(session_id: Uuid) -> String {
    Query::select()
        .column(sea_query::Asterisk)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::SessionId).eq(session_id.to_string()))
        .order_by(Recordings::SentenceIndex, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE recordings SET audio_url = ?, status = 'processing' WHERE id = ?
/// Applied once the payload has landed in object storage.
pub fn mark_stored(id: Uuid, audio_url: &str) -> String {
    Query::update()
        .table(Recordings::Table)
        .value(Recordings::AudioUrl, audio_url)
        .value(Recordings::Status, RecordingStatus::Processing.as_str())
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// Atomic persist of all accumulated job updates on full success.
/// Guarded on status = 'processing' so a recording deleted (or otherwise
/// moved on) mid-job is detected by a zero row count.
pub fn apply_completion(id: Uuid, updates: &DerivedUpdates, processed_at_ms: i64) -> String {
    let mut stmt = Query::update();
    stmt.table(Recordings::Table)
        .value(Recordings::Status, RecordingStatus::Completed.as_str())
        .value(Recordings::ProcessedAt, processed_at_ms)
        .value(Recordings::Error, Option::<String>::None);

    if let Some(ref url) = updates.audio_url {
        stmt.value(Recordings::AudioUrl, url.as_str());
    }
    if let Some(format) = updates.format {
        stmt.value(Recordings::Format, format.as_str());
    }
    if let Some(duration) = updates.duration_secs {
        stmt.value(Recordings::DurationSecs, duration);
    }
    if let Some(ref waveform) = updates.waveform_json {
        stmt.value(Recordings::WaveformJson, waveform.as_str());
    }
    if let Some(ref transcription) = updates.transcription {
        stmt.value(Recordings::Transcription, transcription.as_str());
    }
    if let Some(confidence) = updates.transcription_confidence {
        stmt.value(Recordings::TranscriptionConfidence, confidence);
    }

    stmt.and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .and_where(Expr::col(Recordings::Status).eq(RecordingStatus::Processing.as_str()))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE recordings SET status = 'failed', error = ? WHERE id = ?
/// No partial field updates are applied alongside the failure.
pub fn mark_failed(id: Uuid, error: &str) -> String {
    Query::update()
        .table(Recordings::Table)
        .value(Recordings::Status, RecordingStatus::Failed.as_str())
        .value(Recordings::Error, error)
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// Reprocess transition: back to 'processing' with prior derived artifacts
/// and error cleared, so no stale artifact is exposed mid-run.
pub fn mark_reprocessing(id: Uuid) -> String {
    Query::update()
        .table(Recordings::Table)
        .value(Recordings::Status, RecordingStatus::Processing.as_str())
        .value(Recordings::Error, Option::<String>::None)
        .value(Recordings::WaveformJson, Option::<String>::None)
        .value(Recordings::Transcription, Option::<String>::None)
        .value(Recordings::TranscriptionConfidence, Option::<f64>::None)
        .value(Recordings::QualityScore, Option::<i64>::None)
        .value(Recordings::AnalysisJson, Option::<String>::None)
        .value(Recordings::ProcessedAt, Option::<i64>::None)
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE recordings SET quality_score = ?, analysis_json = ? WHERE id = ?
pub fn update_analysis(id: Uuid, quality_score: i64, analysis_json: &str) -> String {
    Query::update()
        .table(Recordings::Table)
        .value(Recordings::QualityScore, quality_score)
        .value(Recordings::AnalysisJson, analysis_json)
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM recordings WHERE id = ?
pub fn delete_by_id(id: Uuid) -> String {
    Query::delete()
        .from_table(Recordings::Table)
        .and_where(Expr::col(Recordings::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM recordings WHERE user_id = ? AND created_at >= ?
pub fn count_since(user_id: &str, since_ms: i64) -> String {
    Query::select()
        .expr(Func::count(Expr::col(Recordings::Id)))
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::UserId).eq(user_id))
        .and_where(Expr::col(Recordings::CreatedAt).gte(since_ms))
        .to_string(SqliteQueryBuilder)
}

/// SELECT SUM(file_size) FROM recordings WHERE user_id = ?
pub fn sum_file_size(user_id: &str) -> String {
    Query::select()
        .expr(Func::sum(Expr::col(Recordings::FileSize)))
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::UserId).eq(user_id))
        .to_string(SqliteQueryBuilder)
}
