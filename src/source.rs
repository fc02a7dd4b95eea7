//! Read-only access to a local Zotero library.
//!
//! [`ZoteroReader`] turns rows from `zotero.sqlite` into [`LibraryRecord`]s
//! and extracts attachment text on demand. The pipeline only sees the
//! [`LibrarySource`] trait, so tests can substitute their own sources.
//!
//! # Attachment resolution
//!
//! Zotero stores imported files as `storage:<relative path>` under
//! `<storage dir>/<attachment key>/`. Linked files are stored as absolute
//! paths and used as-is. Anything else (e.g. `attachments:` paths relative
//! to a base directory we do not know) is left unresolved.
//!
//! # Fulltext selection
//!
//! Among a record's attachments whose file exists on disk, PDFs are tried
//! first, then HTML snapshots, each in attachment order. The first one that
//! yields non-blank text wins. Extraction problems never escape: a broken
//! attachment simply means "no fulltext".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::SourceConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::extract::{self, ExtractLimits};
use crate::models::{AttachmentRef, Creator, Fulltext, FulltextSource, ItemType, LibraryRecord};

/// Item types that are never candidates for indexing.
const EXCLUDED_TYPES: &str = "('attachment', 'note', 'annotation')";

/// Bulk lookups bind at most this many ids per statement.
const ID_CHUNK: usize = 500;

/// Everything the update pipeline needs from a bibliographic source.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Number of regular items (attachments, notes, annotations excluded).
    async fn count_items(&self) -> Result<u64>;

    /// Regular items, most recently modified first.
    async fn list_items(
        &self,
        limit: Option<usize>,
        include_fulltext: bool,
    ) -> Result<Vec<LibraryRecord>>;

    async fn get_item(&self, key: &str) -> Result<Option<LibraryRecord>>;

    /// Child attachments of `item_id`, with paths resolved.
    async fn attachments(&self, item_id: i64) -> Result<Vec<AttachmentRef>>;

    /// Cheap check: does some PDF or HTML attachment exist on disk?
    async fn has_local_fulltext(&self, item_id: i64) -> bool {
        match self.attachments(item_id).await {
            Ok(atts) => !fulltext_candidates(&atts).is_empty(),
            Err(e) => {
                tracing::debug!(item_id, error = %e, "attachment lookup failed");
                false
            }
        }
    }

    /// Extracted and truncated text of the best attachment, if any.
    async fn extract_fulltext(&self, item_id: i64) -> Option<Fulltext>;
}

/// Existing PDF attachments, then existing HTML ones, in attachment order.
pub fn fulltext_candidates(atts: &[AttachmentRef]) -> Vec<(PathBuf, FulltextSource)> {
    let pdfs = atts
        .iter()
        .filter(|a| a.is_pdf())
        .filter_map(|a| a.existing_path().map(|p| (p.clone(), FulltextSource::Pdf)));
    let htmls = atts
        .iter()
        .filter(|a| a.is_html())
        .filter_map(|a| a.existing_path().map(|p| (p.clone(), FulltextSource::Html)));
    pdfs.chain(htmls).collect()
}

/// Resolve a stored attachment path to a filesystem path.
pub fn resolve_attachment_path(
    storage_dir: &Path,
    attachment_key: &str,
    raw: &str,
) -> Option<PathBuf> {
    if let Some(rel) = raw.strip_prefix("storage:") {
        if rel.is_empty() {
            return None;
        }
        return Some(storage_dir.join(attachment_key).join(rel));
    }
    let p = Path::new(raw);
    p.is_absolute().then(|| p.to_path_buf())
}

/// Parse Zotero's `YYYY-MM-DD HH:MM:SS` UTC timestamps.
fn parse_zotero_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// Zotero stores `date` as `"<sortable> <as entered>"`, e.g.
/// `"2019-03-00 March 2019"`. Keep the part the user typed.
fn display_date(raw: &str) -> String {
    let b = raw.as_bytes();
    let sortable = b.len() > 11
        && b[10] == b' '
        && b[..10]
            .iter()
            .enumerate()
            .all(|(i, c)| if i == 4 || i == 7 { *c == b'-' } else { c.is_ascii_digit() });
    if sortable {
        raw[11..].trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Which items a load should cover.
enum Scope<'a> {
    Recent(Option<usize>),
    Key(&'a str),
}

/// Reader over a `zotero.sqlite` opened read-only.
pub struct ZoteroReader {
    pool: SqlitePool,
    db_path: PathBuf,
    storage_dir: PathBuf,
    limits: ExtractLimits,
}

impl ZoteroReader {
    pub async fn open(source: &SourceConfig, limits: ExtractLimits) -> Result<Self> {
        let pool = db::connect_source(source).await?;
        Ok(Self {
            pool,
            db_path: source.resolved_db_path(),
            storage_dir: source.resolved_storage_dir(),
            limits,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn unavailable(&self, e: impl ToString) -> Error {
        Error::source_unavailable(&self.db_path, e)
    }

    async fn load_records(&self, scope: Scope<'_>) -> Result<Vec<LibraryRecord>> {
        let base = format!(
            r#"
            SELECT i.itemID, i.key, it.typeName,
                   CAST(i.dateAdded AS TEXT) AS dateAdded,
                   CAST(i.dateModified AS TEXT) AS dateModified
            FROM items i
            JOIN itemTypes it ON it.itemTypeID = i.itemTypeID
            WHERE it.typeName NOT IN {}
            "#,
            EXCLUDED_TYPES
        );
        let rows = match scope {
            Scope::Recent(limit) => {
                // A negative LIMIT means "no limit" in SQLite.
                let sql = format!("{} ORDER BY i.dateModified DESC, i.itemID DESC LIMIT ?", base);
                sqlx::query(&sql)
                    .bind(limit.map(|n| n as i64).unwrap_or(-1))
                    .fetch_all(&self.pool)
                    .await
            }
            Scope::Key(key) => {
                let sql = format!("{} AND i.key = ?", base);
                sqlx::query(&sql).bind(key).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| self.unavailable(e))?;

        let mut records: Vec<LibraryRecord> = rows
            .iter()
            .map(|row| {
                let type_name: String = row.get("typeName");
                let mut rec = LibraryRecord::new(
                    row.get("itemID"),
                    row.get::<String, _>("key"),
                    ItemType::from_type_name(&type_name),
                );
                rec.date_added = parse_zotero_ts(row.get("dateAdded"));
                rec.date_modified = parse_zotero_ts(row.get("dateModified"));
                rec
            })
            .collect();

        let ids: Vec<i64> = records.iter().map(|r| r.item_id).collect();
        let mut fields = self.load_fields(&ids).await?;
        let mut creators = self.load_creators(&ids).await?;
        let mut notes = self.load_notes(&ids).await?;
        let mut tags = self.load_tags(&ids).await?;

        for rec in &mut records {
            if let Some(mut f) = fields.remove(&rec.item_id) {
                rec.title = f.remove("title").and_then(non_empty);
                rec.abstract_note = f.remove("abstractNote").and_then(non_empty);
                rec.extra = f.remove("extra").and_then(non_empty);
                rec.doi = f.remove("DOI").and_then(non_empty);
                rec.url = f.remove("url").and_then(non_empty);
                rec.date = f.remove("date").map(|d| display_date(&d)).and_then(non_empty);
                rec.publication = ["publicationTitle", "bookTitle", "proceedingsTitle"]
                    .iter()
                    .find_map(|k| f.remove(*k).and_then(non_empty));
            }
            rec.creators = creators.remove(&rec.item_id).unwrap_or_default();
            rec.notes = notes.remove(&rec.item_id).unwrap_or_default();
            rec.tags = tags.remove(&rec.item_id).unwrap_or_default();
        }

        Ok(records)
    }

    async fn load_fields(&self, ids: &[i64]) -> Result<HashMap<i64, HashMap<String, String>>> {
        let mut out: HashMap<i64, HashMap<String, String>> = HashMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                r#"
                SELECT d.itemID, f.fieldName, CAST(v.value AS TEXT) AS value
                FROM itemData d
                JOIN fields f ON f.fieldID = d.fieldID
                JOIN itemDataValues v ON v.valueID = d.valueID
                WHERE d.itemID IN ({})
                  AND f.fieldName IN ('title', 'abstractNote', 'extra', 'DOI', 'url', 'date',
                                      'publicationTitle', 'bookTitle', 'proceedingsTitle')
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(|e| self.unavailable(e))?;
            for row in rows {
                let value: Option<String> = row.get("value");
                if let Some(value) = value {
                    out.entry(row.get("itemID"))
                        .or_default()
                        .insert(row.get("fieldName"), value);
                }
            }
        }
        Ok(out)
    }

    async fn load_creators(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<Creator>>> {
        let mut out: HashMap<i64, Vec<Creator>> = HashMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                r#"
                SELECT ic.itemID,
                       COALESCE(c.firstName, '') AS firstName,
                       COALESCE(c.lastName, '') AS lastName,
                       COALESCE(c.fieldMode, 0) AS fieldMode
                FROM itemCreators ic
                JOIN creators c ON c.creatorID = ic.creatorID
                WHERE ic.itemID IN ({})
                ORDER BY ic.itemID, ic.orderIndex
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(|e| self.unavailable(e))?;
            for row in rows {
                let first: String = row.get("firstName");
                let last: String = row.get("lastName");
                let field_mode: i64 = row.get("fieldMode");
                let creator = if field_mode == 1 {
                    Creator::Named { name: last }
                } else {
                    Creator::Person {
                        first_name: first,
                        last_name: last,
                    }
                };
                out.entry(row.get("itemID")).or_default().push(creator);
            }
        }
        Ok(out)
    }

    async fn load_notes(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut out: HashMap<i64, Vec<String>> = HashMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                r#"
                SELECT COALESCE(n.parentItemID, n.itemID) AS ownerID, n.note
                FROM itemNotes n
                WHERE COALESCE(n.parentItemID, n.itemID) IN ({})
                ORDER BY n.itemID
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(|e| self.unavailable(e))?;
            for row in rows {
                let note: Option<String> = row.get("note");
                if let Some(note) = note.and_then(non_empty) {
                    out.entry(row.get("ownerID")).or_default().push(note);
                }
            }
        }
        Ok(out)
    }

    async fn load_tags(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut out: HashMap<i64, Vec<String>> = HashMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                r#"
                SELECT it.itemID, t.name
                FROM itemTags it
                JOIN tags t ON t.tagID = it.tagID
                WHERE it.itemID IN ({})
                ORDER BY it.itemID, t.name
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(|e| self.unavailable(e))?;
            for row in rows {
                out.entry(row.get("itemID"))
                    .or_default()
                    .push(row.get::<String, _>("name"));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LibrarySource for ZoteroReader {
    async fn count_items(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM items i JOIN itemTypes it ON it.itemTypeID = i.itemTypeID WHERE it.typeName NOT IN {}",
            EXCLUDED_TYPES
        );
        let n: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(n as u64)
    }

    async fn list_items(
        &self,
        limit: Option<usize>,
        include_fulltext: bool,
    ) -> Result<Vec<LibraryRecord>> {
        let mut records = self.load_records(Scope::Recent(limit)).await?;
        if include_fulltext {
            for rec in &mut records {
                rec.fulltext = self.extract_fulltext(rec.item_id).await;
            }
        }
        Ok(records)
    }

    async fn get_item(&self, key: &str) -> Result<Option<LibraryRecord>> {
        Ok(self.load_records(Scope::Key(key)).await?.into_iter().next())
    }

    async fn attachments(&self, item_id: i64) -> Result<Vec<AttachmentRef>> {
        let rows = sqlx::query(
            r#"
            SELECT i.key, a.path, a.contentType
            FROM itemAttachments a
            JOIN items i ON i.itemID = a.itemID
            WHERE a.parentItemID = ?
            ORDER BY a.itemID
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.unavailable(e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let key: String = row.get("key");
                let raw: Option<String> = row.get("path");
                let path = raw
                    .as_deref()
                    .and_then(|p| resolve_attachment_path(&self.storage_dir, &key, p));
                AttachmentRef {
                    key,
                    path,
                    content_type: row.get("contentType"),
                }
            })
            .collect())
    }

    async fn extract_fulltext(&self, item_id: i64) -> Option<Fulltext> {
        let atts = match self.attachments(item_id).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(item_id, error = %e, "could not list attachments");
                return None;
            }
        };

        for (path, source) in fulltext_candidates(&atts) {
            let limits = self.limits;
            let job_path = path.clone();
            let outcome =
                tokio::task::spawn_blocking(move || {
                    extract::extract_file(&job_path, Some(source.into()), &limits)
                })
                .await;
            match outcome {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    return Some(Fulltext { text, source });
                }
                Ok(Ok(_)) => {
                    tracing::debug!(path = %path.display(), "attachment produced no text");
                }
                Ok(Err(e)) => {
                    let err = Error::extraction(&path, e);
                    tracing::warn!(item_id, error = %err, "skipping attachment");
                }
                Err(join_err) => {
                    let err = Error::extraction(&path, join_err);
                    tracing::warn!(item_id, error = %err, "extraction task failed");
                }
            }
        }
        None
    }
}
