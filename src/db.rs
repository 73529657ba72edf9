//! Database pool management and schema bootstrap.

use std::path::Path;
use std::str::FromStr;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::constants::EXPECTED_DB_VERSION;
use crate::error::PipelineError;
use crate::queries::{ddl, metadata};

/// Open a file-based database pool for production use
/// Enables WAL mode and foreign keys
pub async fn open_database(db_path: impl AsRef<Path>) -> Result<SqlitePool, PipelineError> {
    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite://{}",
        db_path.as_ref().display()
    ))
    .map_err(PipelineError::Database)?
    .create_if_missing(true)
    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
    .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("SQLite database: {}", db_path.as_ref().display());
    Ok(pool)
}

/// Create all tables and indexes if they do not exist
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), PipelineError> {
    for sql in [
        ddl::create_metadata_table(),
        ddl::create_sessions_table(),
        ddl::create_recordings_table(),
        ddl::create_recordings_user_index(),
        ddl::create_recordings_session_index(),
    ] {
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

/// Stamp a fresh database with the expected schema version, or verify an
/// existing one matches. A mismatch is fatal at startup.
pub async fn ensure_schema_version(pool: &SqlitePool) -> Result<(), PipelineError> {
    let sql = metadata::select_by_key("version");
    let existing: Option<String> = sqlx::query_scalar(&sql).fetch_optional(pool).await?;

    match existing {
        None => {
            let sql = metadata::insert("version", EXPECTED_DB_VERSION);
            sqlx::query(&sql).execute(pool).await?;
            Ok(())
        }
        Some(version) if version == EXPECTED_DB_VERSION => Ok(()),
        Some(version) => Err(PipelineError::InvalidRequest(format!(
            "Unsupported database version: '{}'. This application only supports version '{}'",
            version, EXPECTED_DB_VERSION
        ))),
    }
}

/// Create a database in a temporary directory for testing
/// Returns (pool, guard) - keep the guard alive to prevent temp file deletion
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), PipelineError> {
    let guard = tempfile::tempdir()
        .map_err(|e| PipelineError::transient("create temp dir", e))?;
    let db_path = guard.path().join("test.sqlite");
    let pool = open_database(&db_path).await?;
    Ok((pool, guard))
}
