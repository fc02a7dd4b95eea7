//! Index maintenance commands: `zidx update`, `zidx rebuild`, `zidx delete`.
//!
//! [`execute_update`] is the shared entry point for both the CLI and the
//! HTTP server: it takes the cross-process lock, opens the Zotero library,
//! and drives one [`UpdatePipeline`] run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::extract::ExtractLimits;
use crate::guard::LockFile;
use crate::models::RunStats;
use crate::pipeline::{ConfigFileSchedule, UpdateOptions, UpdateOutcome, UpdatePipeline};
use crate::progress::{ProgressMode, ProgressReporter};
use crate::source::{LibrarySource, ZoteroReader};
use crate::store::{IndexStore, SqliteIndexStore};

/// Run one update against the configured library.
///
/// Returns [`UpdateOutcome::AlreadyRunning`] when another process holds the
/// index lock. An unreadable library is not an `Err`: it is reported as a
/// failed run in [`RunStats::error`], like any other fatal pipeline error.
pub async fn execute_update(
    config: &Config,
    config_path: &Path,
    store: &dyn IndexStore,
    opts: &UpdateOptions,
    progress: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<UpdateOutcome> {
    let lock_path = LockFile::path_for(&config.index.path);
    let stale_after = Duration::from_secs(config.update.lock_stale_secs);
    let Some(_lock) = LockFile::acquire(&lock_path, stale_after)? else {
        tracing::info!(lock = %lock_path.display(), "index locked by another run");
        return Ok(UpdateOutcome::AlreadyRunning);
    };

    let limits = ExtractLimits::from(&config.extraction);
    let source: Arc<dyn LibrarySource> = match ZoteroReader::open(&config.source, limits).await {
        Ok(reader) => Arc::new(reader),
        Err(e) => {
            tracing::error!(error = %e, "library unavailable");
            let mut stats = RunStats::start();
            stats.error = Some(e.to_string());
            stats.finish();
            return Ok(UpdateOutcome::Completed(stats));
        }
    };

    let schedule = ConfigFileSchedule::new(config_path);
    let stats = UpdatePipeline::new(source, store)
        .with_schedule(&schedule)
        .with_progress(progress)
        .with_cancellation(cancel)
        .run(opts)
        .await;
    Ok(UpdateOutcome::Completed(stats))
}

/// `zidx update` / `zidx rebuild`: run once and print the run statistics.
pub async fn run_update(
    config: &Config,
    config_path: &Path,
    opts: UpdateOptions,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let store = SqliteIndexStore::from_config(config).await?;
    let reporter = progress.reporter();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current batch");
            on_signal.cancel();
        }
    });

    let outcome = execute_update(
        config,
        config_path,
        &store,
        &opts,
        reporter.as_ref(),
        cancel,
    )
    .await?;
    store.pool().close().await;

    let stats = match outcome {
        UpdateOutcome::AlreadyRunning => {
            println!("update already running; nothing to do");
            return Ok(());
        }
        UpdateOutcome::Completed(stats) => stats,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats, opts.force_rebuild);
    }

    if let Some(err) = &stats.error {
        bail!("update failed: {}", err);
    }
    Ok(())
}

fn print_stats(stats: &RunStats, rebuild: bool) {
    println!("{}", if rebuild { "rebuild" } else { "update" });
    println!("  run id:      {}", stats.run_id);
    println!(
        "  items:       {} ({} duplicates dropped)",
        stats.total_items, stats.deduplicated
    );
    println!("  processed:   {}", stats.processed);
    println!("  added:       {}", stats.added);
    println!("  updated:     {}", stats.updated);
    println!("  skipped:     {}", stats.skipped);
    println!("  errors:      {}", stats.errors);
    println!(
        "  duration:    {:.1}s",
        stats.duration_ms as f64 / 1000.0
    );
    if stats.cancelled {
        println!("  cancelled before completion; last_update not recorded");
    }
}

/// `zidx delete <KEY>...`: drop documents from the index by item key.
pub async fn run_delete(config: &Config, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        bail!("delete requires at least one item key");
    }
    let store = SqliteIndexStore::from_config(config).await?;
    let removed = store.delete(keys).await?;
    store.pool().close().await;

    println!("delete");
    println!("  requested: {}", keys.len());
    println!("  removed:   {}", removed);
    Ok(())
}
