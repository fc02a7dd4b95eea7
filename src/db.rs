use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::Error;

/// Open (creating if needed) the index database.
pub async fn connect_index(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open the Zotero database strictly read-only.
///
/// The desktop app may hold the file open (and locked) at the same time, so
/// the connection never creates, migrates, or writes, and waits up to the
/// configured busy timeout before reporting the source as unavailable.
pub async fn connect_source(source: &SourceConfig) -> Result<SqlitePool, Error> {
    let db_path = source.resolved_db_path();
    if !db_path.is_file() {
        return Err(Error::source_unavailable(&db_path, "file not found"));
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(Duration::from_millis(source.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .map_err(|e| Error::source_unavailable(&db_path, e))?;

    // Opening is lazy about the schema; touch it so a locked or corrupt
    // file is reported here rather than mid-scan.
    sqlx::query("SELECT 1 FROM items LIMIT 1")
        .fetch_optional(&pool)
        .await
        .map_err(|e| Error::source_unavailable(&db_path, e))?;

    Ok(pool)
}
