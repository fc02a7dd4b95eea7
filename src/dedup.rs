//! Preprint / published-version deduplication.
//!
//! Two records describe the same work when their normalized DOI or their
//! normalized title match. For each key the best record is kept by a fixed
//! ranking (journal article > preprint > anything else, first seen wins
//! ties); a preprint is then dropped if either of its keys is owned by a
//! different, journal-article record. Only preprints are ever dropped by
//! this rule, so e.g. two books with the same title are both kept.
//!
//! Records sharing an item key are also collapsed (first occurrence kept),
//! so a key is never emitted twice in one run.

use std::collections::{HashMap, HashSet};

use crate::models::{ItemType, LibraryRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Doi(String),
    Title(String),
}

/// Lowercase with all whitespace removed.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn rank(t: &ItemType) -> u8 {
    match t {
        ItemType::JournalArticle => 2,
        ItemType::Preprint => 1,
        _ => 0,
    }
}

fn keys_of(rec: &LibraryRecord) -> Vec<DedupKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(doi) = rec.doi.as_deref().map(normalize).filter(|d| !d.is_empty()) {
        keys.push(DedupKey::Doi(doi));
    }
    if let Some(title) = rec.title.as_deref().map(normalize).filter(|t| !t.is_empty()) {
        keys.push(DedupKey::Title(title));
    }
    keys
}

/// Outcome of [`deduplicate`].
#[derive(Debug)]
pub struct DedupOutcome {
    /// Surviving records, in input order.
    pub kept: Vec<LibraryRecord>,
    /// Keys of dropped preprints paired with the key that superseded them.
    pub superseded: Vec<(String, String)>,
    /// Number of repeated item keys removed.
    pub repeated_keys: usize,
}

impl DedupOutcome {
    pub fn dropped(&self) -> usize {
        self.superseded.len() + self.repeated_keys
    }
}

pub fn deduplicate(records: Vec<LibraryRecord>) -> DedupOutcome {
    let mut seen = HashSet::new();
    let mut repeated_keys = 0usize;
    let records: Vec<LibraryRecord> = records
        .into_iter()
        .filter(|r| {
            let fresh = seen.insert(r.key.clone());
            if !fresh {
                tracing::warn!(key = %r.key, "dropping repeated item key");
                repeated_keys += 1;
            }
            fresh
        })
        .collect();

    // Pass 1: best record index per key.
    let mut best: HashMap<DedupKey, usize> = HashMap::new();
    let keys: Vec<Vec<DedupKey>> = records.iter().map(keys_of).collect();
    for (idx, rec_keys) in keys.iter().enumerate() {
        for k in rec_keys {
            best.entry(k.clone())
                .and_modify(|cur| {
                    if rank(&records[idx].item_type) > rank(&records[*cur].item_type) {
                        *cur = idx;
                    }
                })
                .or_insert(idx);
        }
    }

    // Pass 2: drop preprints owned elsewhere by a journal article.
    let item_keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
    let is_article: Vec<bool> = records
        .iter()
        .map(|r| r.item_type == ItemType::JournalArticle)
        .collect();

    let mut superseded = Vec::new();
    let mut kept = Vec::with_capacity(records.len());
    for (idx, rec) in records.into_iter().enumerate() {
        if rec.item_type == ItemType::Preprint {
            let winner = keys[idx]
                .iter()
                .filter_map(|k| best.get(k).copied())
                .find(|&b| b != idx && is_article[b]);
            if let Some(b) = winner {
                tracing::debug!(dropped = %rec.key, kept = %item_keys[b], "preprint superseded");
                superseded.push((rec.key, item_keys[b].clone()));
                continue;
            }
        }
        kept.push(rec);
    }

    DedupOutcome {
        kept,
        superseded,
        repeated_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, t: ItemType, doi: Option<&str>, title: Option<&str>) -> LibraryRecord {
        let mut r = LibraryRecord::new(0, key, t);
        r.doi = doi.map(String::from);
        r.title = title.map(String::from);
        r
    }

    fn kept_keys(o: &DedupOutcome) -> Vec<&str> {
        o.kept.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn normalize_strips_whitespace_and_case() {
        assert_eq!(normalize(" 10.1000/ABC \t1 "), "10.1000/abc1");
        assert_eq!(normalize("Deep  Learning\n"), "deeplearning");
    }

    #[test]
    fn preprint_with_same_doi_is_dropped_either_order() {
        let a = rec("A", ItemType::JournalArticle, Some("10.1/X"), Some("Paper"));
        let b = rec("B", ItemType::Preprint, Some("10.1/x "), Some("Paper (preprint)"));

        let out = deduplicate(vec![a.clone(), b.clone()]);
        assert_eq!(kept_keys(&out), vec!["A"]);
        assert_eq!(out.superseded, vec![("B".to_string(), "A".to_string())]);

        let out = deduplicate(vec![b, a]);
        assert_eq!(kept_keys(&out), vec!["A"]);
    }

    #[test]
    fn title_match_also_supersedes() {
        let out = deduplicate(vec![
            rec("P", ItemType::Preprint, None, Some("Attention Is All You Need")),
            rec("J", ItemType::JournalArticle, Some("10.5/j"), Some("attention is all  you need")),
        ]);
        assert_eq!(kept_keys(&out), vec!["J"]);
    }

    #[test]
    fn preprint_kept_when_only_other_types_match() {
        let out = deduplicate(vec![
            rec("B", ItemType::Book, Some("10.1/x"), None),
            rec("P", ItemType::Preprint, Some("10.1/x"), None),
        ]);
        assert_eq!(kept_keys(&out), vec!["B", "P"]);
        assert_eq!(out.dropped(), 0);
    }

    #[test]
    fn non_preprint_duplicates_are_all_kept() {
        let out = deduplicate(vec![
            rec("J1", ItemType::JournalArticle, Some("10.1/x"), None),
            rec("J2", ItemType::JournalArticle, Some("10.1/x"), None),
            rec("T", ItemType::Other("thesis".into()), Some("10.1/x"), None),
        ]);
        assert_eq!(kept_keys(&out), vec!["J1", "J2", "T"]);
    }

    #[test]
    fn records_without_keys_are_kept() {
        let out = deduplicate(vec![
            rec("N1", ItemType::Preprint, None, None),
            rec("N2", ItemType::Preprint, Some("  "), Some("")),
        ]);
        assert_eq!(kept_keys(&out), vec!["N1", "N2"]);
    }

    #[test]
    fn two_preprints_both_survive() {
        let out = deduplicate(vec![
            rec("P1", ItemType::Preprint, Some("10.1/x"), None),
            rec("P2", ItemType::Preprint, Some("10.1/x"), None),
        ]);
        assert_eq!(kept_keys(&out), vec!["P1", "P2"]);
    }

    #[test]
    fn repeated_item_keys_are_collapsed() {
        let out = deduplicate(vec![
            rec("A", ItemType::Book, None, Some("First")),
            rec("A", ItemType::Book, None, Some("Second")),
        ]);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.kept[0].title.as_deref(), Some("First"));
        assert_eq!(out.repeated_keys, 1);
        assert_eq!(out.dropped(), 1);
    }
}
