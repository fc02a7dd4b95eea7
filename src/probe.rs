//! Decide whether a record needs (re)processing in this run.
//!
//! Extraction dominates the cost of a run, so a record already indexed with
//! fulltext is never touched again, and a metadata-only record is reprocessed
//! only once its library entry gains a usable attachment. The availability
//! check is an existence test on disk, not an extraction.

use crate::models::{DocumentMetadata, LibraryRecord};
use crate::source::LibrarySource;
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Stored with fulltext already.
    AlreadyComplete,
    /// Stored without fulltext and none is available now.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDecision {
    /// Not in the index (or a forced rebuild): process and count as added.
    New,
    /// In the index without fulltext, and fulltext is now available.
    Refresh,
    Skip(SkipReason),
}

impl ProbeDecision {
    pub fn should_process(&self) -> bool {
        !matches!(self, ProbeDecision::Skip(_))
    }
}

/// The decision table.
pub fn decide(
    stored: Option<&DocumentMetadata>,
    local_available: bool,
    force: bool,
) -> ProbeDecision {
    if force {
        return ProbeDecision::New;
    }
    match stored {
        None => ProbeDecision::New,
        Some(meta) if meta.has_fulltext => ProbeDecision::Skip(SkipReason::AlreadyComplete),
        Some(_) if local_available => ProbeDecision::Refresh,
        Some(_) => ProbeDecision::Skip(SkipReason::Unchanged),
    }
}

/// Look up `record` in `store` and apply [`decide`].
///
/// The attachment check only runs when its answer can change the outcome,
/// and is skipped entirely when the run does not extract fulltext. A failed
/// metadata lookup is treated as "not stored", so the record is processed.
pub async fn probe(
    store: &dyn IndexStore,
    source: &dyn LibrarySource,
    record: &LibraryRecord,
    extract_fulltext: bool,
) -> ProbeDecision {
    let stored = match store.get_metadata(&record.key).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(key = %record.key, error = %e, "metadata lookup failed; reprocessing");
            None
        }
    };

    let needs_check = extract_fulltext && stored.as_ref().is_some_and(|m| !m.has_fulltext);
    let local_available = needs_check && source.has_local_fulltext(record.item_id).await;

    decide(stored.as_ref(), local_available, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(has_fulltext: bool) -> DocumentMetadata {
        DocumentMetadata {
            item_key: "K".into(),
            has_fulltext,
            fulltext_source: if has_fulltext { "pdf".into() } else { String::new() },
            ..DocumentMetadata::default()
        }
    }

    #[test]
    fn full_decision_matrix() {
        let with_ft = meta(true);
        let without_ft = meta(false);
        let cases: [(Option<&DocumentMetadata>, bool, ProbeDecision); 6] = [
            (None, false, ProbeDecision::New),
            (None, true, ProbeDecision::New),
            (Some(&with_ft), false, ProbeDecision::Skip(SkipReason::AlreadyComplete)),
            (Some(&with_ft), true, ProbeDecision::Skip(SkipReason::AlreadyComplete)),
            (Some(&without_ft), true, ProbeDecision::Refresh),
            (Some(&without_ft), false, ProbeDecision::Skip(SkipReason::Unchanged)),
        ];
        for (stored, local, expected) in cases {
            assert_eq!(
                decide(stored, local, false),
                expected,
                "stored={:?} local={}",
                stored.map(|m| m.has_fulltext),
                local
            );
        }
    }

    #[test]
    fn force_always_processes() {
        for stored in [None, Some(meta(true)), Some(meta(false))] {
            for local in [false, true] {
                assert_eq!(decide(stored.as_ref(), local, true), ProbeDecision::New);
            }
        }
    }

    #[test]
    fn only_skips_are_not_processed() {
        assert!(ProbeDecision::New.should_process());
        assert!(ProbeDecision::Refresh.should_process());
        assert!(!ProbeDecision::Skip(SkipReason::Unchanged).should_process());
    }
}
