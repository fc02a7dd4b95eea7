//! Index status overview.
//!
//! A quick summary of what is indexed and when it was last refreshed:
//! document counts, fulltext coverage, the update schedule, and whether an
//! automatic run is due. Used by `zidx status` and `GET /status`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::schedule::UpdateSchedule;
use crate::store::{IndexStore, SqliteIndexStore};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index_path: PathBuf,
    pub index_bytes: u64,
    pub documents: usize,
    pub with_fulltext: i64,
    /// Unix seconds of the most recent document write.
    pub last_write: Option<i64>,
    pub last_update: Option<DateTime<Utc>>,
    pub auto_update: bool,
    pub update_frequency: String,
    pub update_due: bool,
    pub library_db: PathBuf,
}

pub async fn collect_status(config: &Config, store: &SqliteIndexStore) -> Result<IndexStatus> {
    let documents = store.count().await?;
    let with_fulltext: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE json_extract(metadata_json, '$.has_fulltext') = 1",
    )
    .fetch_one(store.pool())
    .await?;
    let last_write = store.last_write().await?;

    let schedule = UpdateSchedule::from_config(&config.update);
    let index_bytes = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(IndexStatus {
        index_path: config.index.path.clone(),
        index_bytes,
        documents,
        with_fulltext,
        last_write,
        last_update: schedule.last_update,
        auto_update: schedule.auto_update,
        update_frequency: schedule.frequency.to_string(),
        update_due: schedule.should_update(Utc::now()),
        library_db: config.source.resolved_db_path(),
    })
}

/// `zidx status`: print a summary of the index.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let store = SqliteIndexStore::from_config(config).await?;
    let status = collect_status(config, &store).await?;
    store.pool().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Zotero Index Status");
    println!("===================");
    println!();
    println!("  Index:       {}", status.index_path.display());
    println!("  Size:        {}", format_bytes(status.index_bytes));
    println!("  Library:     {}", status.library_db.display());
    println!();
    println!("  Documents:   {}", status.documents);
    println!(
        "  Fulltext:    {} / {} ({}%)",
        status.with_fulltext,
        status.documents,
        if status.documents > 0 {
            (status.with_fulltext * 100) / status.documents as i64
        } else {
            0
        }
    );
    println!(
        "  Last write:  {}",
        status
            .last_write
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!(
        "  Schedule:    {}{}",
        status.update_frequency,
        if status.auto_update { "" } else { " (auto-update off)" }
    );
    println!(
        "  Last update: {}",
        status
            .last_update
            .map(|t| format_ts_relative(t.timestamp()))
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Update due:  {}",
        if status.update_due { "yes" } else { "no" }
    );
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::models::{DocumentMetadata, IndexedDocument};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3600), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }

    #[tokio::test]
    async fn counts_fulltext_documents() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.index.path = dir.path().join("index.sqlite");
        config.update.last_update = Some("2024-01-01T00:00:00Z".into());

        let store = SqliteIndexStore::open(&config.index.path, Arc::new(HashProvider::new(32)))
            .await
            .unwrap();
        let doc = |id: &str, has_fulltext: bool| IndexedDocument {
            id: id.into(),
            text: format!("text for {}", id),
            metadata: DocumentMetadata {
                item_key: id.into(),
                has_fulltext,
                ..DocumentMetadata::default()
            },
        };
        store
            .upsert(&[doc("A", true), doc("B", false), doc("C", false)])
            .await
            .unwrap();

        let status = collect_status(&config, &store).await.unwrap();
        assert_eq!(status.documents, 3);
        assert_eq!(status.with_fulltext, 1);
        assert!(status.last_write.is_some());
        assert!(status.last_update.is_some());
        assert!(!status.update_due);
        assert_eq!(status.update_frequency, "manual");
    }
}
