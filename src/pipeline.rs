//! Incremental update pipeline.
//!
//! One run moves through `FETCHING → DEDUPING → (per batch: PROBING →
//! EXTRACTING → UPSERTING) → FINALIZING`:
//!
//! 1. Fetch metadata for every candidate (optionally limited), most recently
//!    modified first. Failure here is fatal to the run.
//! 2. Collapse preprint/published duplicates ([`crate::dedup`]).
//! 3. Per batch, ask the probe ([`crate::probe`]) which candidates need work.
//!    A forced rebuild clears the index first and skips the probe.
//! 4. Extract fulltext for the survivors, in parallel up to the configured
//!    concurrency, then build their documents. A refresh whose attachment
//!    still yields no text is counted as skipped and not rewritten.
//! 5. Upsert the batch. A failed upsert counts every document in that batch
//!    as an error and the run moves on to the next batch.
//! 6. When the pass completed, record `last_update`.
//!
//! [`UpdatePipeline::run`] never fails: fatal problems end up in
//! [`RunStats::error`]. Cancellation is checked between batches, so an
//! in-flight batch always finishes its accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{self, Config};
use crate::dedup;
use crate::document::build_document;
use crate::error::Error;
use crate::guard::RunGuard;
use crate::models::{LibraryRecord, RunStats};
use crate::probe::{self, ProbeDecision};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, RunPhase};
use crate::source::LibrarySource;
use crate::store::IndexStore;

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Cap on candidates fetched (most recent first).
    pub limit: Option<usize>,
    pub extract_fulltext: bool,
    pub force_rebuild: bool,
    pub batch_size: usize,
    pub extract_concurrency: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            limit: None,
            extract_fulltext: false,
            force_rebuild: false,
            batch_size: 50,
            extract_concurrency: 4,
        }
    }
}

impl UpdateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: None,
            extract_fulltext: config.update.extract_fulltext,
            force_rebuild: false,
            batch_size: config.update.batch_size,
            extract_concurrency: config.extraction.concurrency,
        }
    }
}

/// Where the time of the last completed run is persisted.
pub trait ScheduleStore: Send + Sync {
    fn record_run(&self, finished_at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Writes `update.last_update` into a config file.
pub struct ConfigFileSchedule {
    path: std::path::PathBuf,
}

impl ConfigFileSchedule {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScheduleStore for ConfigFileSchedule {
    fn record_run(&self, finished_at: DateTime<Utc>) -> anyhow::Result<()> {
        config::record_last_update(&self.path, finished_at)
    }
}

/// Discards run timestamps.
pub struct NoSchedule;

impl ScheduleStore for NoSchedule {
    fn record_run(&self, _finished_at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Result of asking for a run while honoring the single-run guard.
#[derive(Debug)]
pub enum UpdateOutcome {
    Completed(RunStats),
    /// Another run holds the guard; nothing was done.
    AlreadyRunning,
}

pub struct UpdatePipeline<'a> {
    source: Arc<dyn LibrarySource>,
    store: &'a dyn IndexStore,
    schedule: &'a dyn ScheduleStore,
    progress: &'a dyn ProgressReporter,
    cancel: CancellationToken,
}

impl<'a> UpdatePipeline<'a> {
    pub fn new(source: Arc<dyn LibrarySource>, store: &'a dyn IndexStore) -> Self {
        Self {
            source,
            store,
            schedule: &NoSchedule,
            progress: &NoProgress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: &'a dyn ScheduleStore) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run only if no other run holds `guard`.
    pub async fn run_exclusive(&self, guard: &RunGuard, opts: &UpdateOptions) -> UpdateOutcome {
        match guard.try_acquire() {
            Some(_ticket) => UpdateOutcome::Completed(self.run(opts).await),
            None => {
                tracing::info!("update already running; ignoring trigger");
                UpdateOutcome::AlreadyRunning
            }
        }
    }

    pub async fn run(&self, opts: &UpdateOptions) -> RunStats {
        let mut stats = RunStats::start();
        let span = tracing::info_span!("update", run_id = %stats.run_id);
        self.run_inner(opts, &mut stats).instrument(span).await;
        stats
    }

    async fn run_inner(&self, opts: &UpdateOptions, stats: &mut RunStats) {
        let batch_size = opts.batch_size.max(1);
        tracing::info!(
            limit = ?opts.limit,
            extract_fulltext = opts.extract_fulltext,
            force_rebuild = opts.force_rebuild,
            "update started"
        );

        self.progress.report(ProgressEvent::Phase(RunPhase::Fetching));
        let records = match self.source.list_items(opts.limit, false).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "could not fetch candidates; aborting run");
                stats.error = Some(e.to_string());
                stats.finish();
                return;
            }
        };
        stats.total_items = records.len() as u64;

        if opts.force_rebuild {
            if let Err(e) = self.store.reset().await {
                let err = Error::Store(format!("{:#}", e));
                tracing::error!(error = %err, "could not reset index; aborting rebuild");
                stats.error = Some(err.to_string());
                stats.finish();
                return;
            }
            tracing::info!("index cleared for rebuild");
        }

        self.progress.report(ProgressEvent::Phase(RunPhase::Deduping));
        let outcome = dedup::deduplicate(records);
        stats.deduplicated = outcome.dropped() as u64;
        let candidates = outcome.kept;
        let total = candidates.len() as u64;
        self.progress.report(ProgressEvent::Candidates {
            fetched: stats.total_items,
            candidates: total,
        });

        let batches = candidates.len().div_ceil(batch_size);
        let mut remaining = candidates.into_iter();
        let mut done = 0u64;
        for batch_no in 1..=batches {
            if self.cancel.is_cancelled() {
                tracing::warn!(batch = batch_no, "update cancelled before batch");
                stats.cancelled = true;
                break;
            }
            let batch: Vec<LibraryRecord> = remaining.by_ref().take(batch_size).collect();
            done += batch.len() as u64;
            self.run_batch(batch_no, batch, opts, stats).await;
            self.progress.report(ProgressEvent::Batch {
                batch: batch_no,
                batches,
                done,
                total,
            });
        }

        self.progress.report(ProgressEvent::Phase(RunPhase::Finalizing));
        stats.finish();
        if stats.completed() {
            let finished_at = stats.finished_at.unwrap_or_else(Utc::now);
            if let Err(e) = self.schedule.record_run(finished_at) {
                tracing::warn!(error = %format!("{:#}", e), "could not persist last_update");
            }
        }
        tracing::info!(
            total_items = stats.total_items,
            processed = stats.processed,
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            cancelled = stats.cancelled,
            duration_ms = stats.duration_ms,
            "update finished"
        );
    }

    async fn run_batch(
        &self,
        batch_no: usize,
        batch: Vec<LibraryRecord>,
        opts: &UpdateOptions,
        stats: &mut RunStats,
    ) {
        self.progress.report(ProgressEvent::Phase(RunPhase::Probing));
        let mut work: Vec<(LibraryRecord, ProbeDecision)> = Vec::with_capacity(batch.len());
        for record in batch {
            let decision = if opts.force_rebuild {
                ProbeDecision::New
            } else {
                probe::probe(
                    self.store,
                    self.source.as_ref(),
                    &record,
                    opts.extract_fulltext,
                )
                .await
            };
            if decision.should_process() {
                work.push((record, decision));
            } else {
                tracing::debug!(key = %record.key, ?decision, "skipping");
                stats.skipped += 1;
            }
        }

        if opts.extract_fulltext && !work.is_empty() {
            self.progress.report(ProgressEvent::Phase(RunPhase::Extracting));
            self.extract_all(&mut work, opts.extract_concurrency).await;
        }

        let mut docs = Vec::with_capacity(work.len());
        let mut decisions = Vec::with_capacity(work.len());
        for (record, decision) in &work {
            // The stored copy is already the metadata-only document.
            if *decision == ProbeDecision::Refresh && record.fulltext.is_none() {
                tracing::debug!(key = %record.key, "attachment yielded no text; keeping stored document");
                stats.skipped += 1;
                continue;
            }
            match build_document(record) {
                Some(doc) => {
                    docs.push(doc);
                    decisions.push(*decision);
                }
                None => {
                    tracing::debug!(key = %record.key, "nothing to index");
                    stats.skipped += 1;
                }
            }
        }
        if docs.is_empty() {
            return;
        }
        stats.processed += docs.len() as u64;

        self.progress.report(ProgressEvent::Phase(RunPhase::Upserting));
        match self.store.upsert(&docs).await {
            Ok(()) => {
                for d in decisions {
                    match d {
                        ProbeDecision::Refresh => stats.updated += 1,
                        _ => stats.added += 1,
                    }
                }
            }
            Err(e) => {
                let err = Error::Store(format!("{:#}", e));
                tracing::warn!(batch = batch_no, documents = docs.len(), error = %err, "batch upsert failed");
                stats.errors += docs.len() as u64;
            }
        }
    }

    /// Fill in `fulltext` for every record in `work`, at most `concurrency`
    /// extractions at a time. Order of `work` is preserved.
    async fn extract_all(&self, work: &mut [(LibraryRecord, ProbeDecision)], concurrency: usize) {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (idx, (record, _)) in work.iter().enumerate() {
            let source = self.source.clone();
            let permits = permits.clone();
            let item_id = record.item_id;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (idx, source.extract_fulltext(item_id).await)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, fulltext)) => work[idx].0.fulltext = fulltext,
                Err(e) => tracing::warn!(error = %e, "extraction task failed"),
            }
        }
    }
}
