use sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::schema::{Metadata, Recordings, Sessions};

/// CREATE TABLE IF NOT EXISTS metadata
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).text().not_null().primary_key())
        .col(ColumnDef::new(Metadata::Value).text().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS sessions
pub fn create_sessions_table() -> String {
    Table::create()
        .table(Sessions::Table)
        .if_not_exists()
        .col(ColumnDef::new(Sessions::Id).text().not_null().primary_key())
        .col(ColumnDef::new(Sessions::UserId).text().not_null())
        .col(ColumnDef::new(Sessions::CreatedAt).big_integer().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS recordings
pub fn create_recordings_table() -> String {
    Table::create()
        .table(Recordings::Table)
        .if_not_exists()
        .col(ColumnDef::new(Recordings::Id).text().not_null().primary_key())
        .col(ColumnDef::new(Recordings::UserId).text().not_null())
        .col(ColumnDef::new(Recordings::SessionId).text().not_null())
        .col(ColumnDef::new(Recordings::SentenceIndex).big_integer().not_null())
        .col(ColumnDef::new(Recordings::SentenceStartTime).double().not_null())
        .col(ColumnDef::new(Recordings::SentenceEndTime).double().not_null())
        .col(ColumnDef::new(Recordings::AudioUrl).text().not_null())
        .col(ColumnDef::new(Recordings::Format).text().not_null())
        .col(ColumnDef::new(Recordings::DurationSecs).double())
        .col(ColumnDef::new(Recordings::FileSize).big_integer().not_null())
        .col(ColumnDef::new(Recordings::WaveformJson).text())
        .col(ColumnDef::new(Recordings::Transcription).text())
        .col(ColumnDef::new(Recordings::TranscriptionConfidence).double())
        .col(ColumnDef::new(Recordings::QualityScore).big_integer())
        .col(ColumnDef::new(Recordings::AnalysisJson).text())
        .col(ColumnDef::new(Recordings::Status).text().not_null())
        .col(ColumnDef::new(Recordings::Error).text())
        .col(ColumnDef::new(Recordings::CreatedAt).big_integer().not_null())
        .col(ColumnDef::new(Recordings::ProcessedAt).big_integer())
        .foreign_key(
            ForeignKey::create()
                .from(Recordings::Table, Recordings::SessionId)
                .to(Sessions::Table, Sessions::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_string(SqliteQueryBuilder)
}

/// Index for the quota aggregates (daily count and storage sum per user)
pub fn create_recordings_user_index() -> String {
    Index::create()
        .name("idx_recordings_user_created")
        .table(Recordings::Table)
        .col(Recordings::UserId)
        .col(Recordings::CreatedAt)
        .if_not_exists()
        .to_string(SqliteQueryBuilder)
}

/// Index for listing a session's recordings in sentence order
pub fn create_recordings_session_index() -> String {
    Index::create()
        .name("idx_recordings_session")
        .table(Recordings::Table)
        .col(Recordings::SessionId)
        .col(Recordings::SentenceIndex)
        .if_not_exists()
        .to_string(SqliteQueryBuilder)
}
