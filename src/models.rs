//! Core data types shared across the reader, the pipeline, and the stores.
//!
//! Records are read fresh from Zotero on every run and never persisted by
//! the core; the only persisted artifact is an [`IndexedDocument`] in the
//! index store, plus the `last_update` timestamp in the config file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Zotero item type. Open-ended: anything we do not rank is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemType {
    JournalArticle,
    Preprint,
    Book,
    Other(String),
}

impl ItemType {
    /// Parse a Zotero `itemTypes.typeName` value (e.g. `journalArticle`).
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "journalArticle" => ItemType::JournalArticle,
            "preprint" => ItemType::Preprint,
            "book" => ItemType::Book,
            other => ItemType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemType::JournalArticle => "journalArticle",
            ItemType::Preprint => "preprint",
            ItemType::Book => "book",
            ItemType::Other(name) => name,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an item's ordered creator list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creator {
    Person {
        first_name: String,
        last_name: String,
    },
    /// Single-field creator (institution, or a person stored in one field).
    Named { name: String },
}

impl Creator {
    /// `"Last, First"` for people, the bare name otherwise.
    pub fn display_name(&self) -> String {
        match self {
            Creator::Person {
                first_name,
                last_name,
            } => match (last_name.is_empty(), first_name.is_empty()) {
                (false, false) => format!("{}, {}", last_name, first_name),
                (false, true) => last_name.clone(),
                (true, _) => first_name.clone(),
            },
            Creator::Named { name } => name.clone(),
        }
    }
}

/// Which kind of attachment produced a record's fulltext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulltextSource {
    Pdf,
    Html,
}

impl FulltextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulltextSource::Pdf => "pdf",
            FulltextSource::Html => "html",
        }
    }
}

/// Extracted, already-truncated attachment text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulltext {
    pub text: String,
    pub source: FulltextSource,
}

/// A bibliographic entry as read from the Zotero database.
#[derive(Debug, Clone)]
pub struct LibraryRecord {
    /// Source-internal row id; needed to enumerate child attachments.
    pub item_id: i64,
    /// Stable Zotero item key (8 chars, unique per library).
    pub key: String,
    pub item_type: ItemType,
    pub title: Option<String>,
    pub doi: Option<String>,
    pub creators: Vec<Creator>,
    pub abstract_note: Option<String>,
    pub extra: Option<String>,
    pub publication: Option<String>,
    pub date: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    /// Raw note bodies (HTML as stored by Zotero).
    pub notes: Vec<String>,
    pub date_added: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    /// Populated only when the reader was asked for fulltext.
    pub fulltext: Option<Fulltext>,
}

impl LibraryRecord {
    /// Minimal record with only identity fields set. Handy for tests and
    /// for callers that fill in the rest incrementally.
    pub fn new(item_id: i64, key: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            item_id,
            key: key.into(),
            item_type,
            title: None,
            doi: None,
            creators: Vec::new(),
            abstract_note: None,
            extra: None,
            publication: None,
            date: None,
            url: None,
            tags: Vec::new(),
            notes: Vec::new(),
            date_added: None,
            date_modified: None,
            fulltext: None,
        }
    }

    /// Creators joined as `"Last, First; Other"`. Empty when there are none.
    pub fn creators_text(&self) -> String {
        self.creators
            .iter()
            .map(Creator::display_name)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Better BibTeX citation key, if recorded in the `extra` field.
    pub fn citation_key(&self) -> Option<String> {
        let extra = self.extra.as_deref()?;
        extra.lines().find_map(|line| {
            let trimmed = line.trim();
            let lower = trimmed.to_ascii_lowercase();
            ["citation key:", "citationkey:"].iter().find_map(|prefix| {
                if lower.starts_with(prefix) {
                    let value = trimmed[prefix.len()..].trim();
                    (!value.is_empty()).then(|| value.to_string())
                } else {
                    None
                }
            })
        })
    }
}

/// A child attachment of a record, resolved against the storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub key: String,
    /// Absolute path when the stored path could be resolved.
    pub path: Option<PathBuf>,
    pub content_type: Option<String>,
}

impl AttachmentRef {
    pub fn is_pdf(&self) -> bool {
        self.content_type.as_deref() == Some("application/pdf")
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/html"))
    }

    /// Resolved path, only if the file is actually on disk.
    pub fn existing_path(&self) -> Option<&PathBuf> {
        self.path.as_ref().filter(|p| p.is_file())
    }
}

/// Metadata stored next to each indexed document.
///
/// `has_fulltext` and `fulltext_source` are the only fields the update
/// probe reads. Missing fields deserialize to their defaults so documents
/// written by older versions remain readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub item_key: String,
    pub item_type: String,
    pub title: String,
    pub date: String,
    pub date_added: String,
    pub date_modified: String,
    pub creators: String,
    pub publication: String,
    pub url: String,
    pub doi: String,
    pub tags: String,
    pub citation_key: String,
    pub has_fulltext: bool,
    /// `"pdf"`, `"html"`, or `""`.
    pub fulltext_source: String,
}

/// The unit written to the index store. Embedding is the store's job.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Counters for one update run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub run_id: String,
    /// Candidates fetched from the source, before deduplication.
    pub total_items: u64,
    /// Candidates dropped by the deduplicator.
    pub deduplicated: u64,
    /// Documents built and submitted for upsert.
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub cancelled: bool,
    /// Set when the run aborted on a fatal error.
    pub error: Option<String>,
}

impl RunStats {
    pub fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            total_items: 0,
            deduplicated: 0,
            processed: 0,
            added: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            cancelled: false,
            error: None,
        }
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }

    /// True when the run made a full pass over its candidates.
    pub fn completed(&self) -> bool {
        !self.cancelled && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creators_are_formatted_last_first() {
        let mut rec = LibraryRecord::new(1, "ABCD1234", ItemType::JournalArticle);
        rec.creators = vec![
            Creator::Person {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            Creator::Named {
                name: "CERN".into(),
            },
            Creator::Person {
                first_name: String::new(),
                last_name: "Turing".into(),
            },
        ];
        assert_eq!(rec.creators_text(), "Lovelace, Ada; CERN; Turing");
    }

    #[test]
    fn empty_creators_give_empty_text() {
        let rec = LibraryRecord::new(1, "K", ItemType::Book);
        assert_eq!(rec.creators_text(), "");
    }

    #[test]
    fn citation_key_parsed_from_extra() {
        let mut rec = LibraryRecord::new(1, "K", ItemType::JournalArticle);
        rec.extra = Some("tex.foo: bar\nCitation Key: lovelace1843\n".into());
        assert_eq!(rec.citation_key().as_deref(), Some("lovelace1843"));

        rec.extra = Some("citationkey:turing1936".into());
        assert_eq!(rec.citation_key().as_deref(), Some("turing1936"));

        rec.extra = Some("citation key:   ".into());
        assert_eq!(rec.citation_key(), None);
    }

    #[test]
    fn item_type_round_trips_type_names() {
        assert_eq!(
            ItemType::from_type_name("journalArticle"),
            ItemType::JournalArticle
        );
        assert_eq!(ItemType::from_type_name("preprint").as_str(), "preprint");
        assert_eq!(
            ItemType::from_type_name("thesis"),
            ItemType::Other("thesis".into())
        );
    }

    #[test]
    fn metadata_tolerates_missing_fields() {
        let meta: DocumentMetadata = serde_json::from_str(r#"{"item_key":"K"}"#).unwrap();
        assert_eq!(meta.item_key, "K");
        assert!(!meta.has_fulltext);
        assert_eq!(meta.fulltext_source, "");
    }

    #[test]
    fn html_content_type_with_charset() {
        let att = AttachmentRef {
            key: "A".into(),
            path: None,
            content_type: Some("text/html; charset=utf-8".into()),
        };
        assert!(att.is_html());
        assert!(!att.is_pdf());
        assert!(att.existing_path().is_none());
    }
}
