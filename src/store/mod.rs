//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the only way the update pipeline touches the
//! vector index. It is passed around explicitly (`&dyn IndexStore`), so a
//! pipeline can run against any backend, including test doubles.
//!
//! Embedding is the store's concern: callers hand over text and metadata,
//! and the store decides when a vector needs computing.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](IndexStore::upsert) | Insert or fully replace documents by id |
//! | [`get_metadata`](IndexStore::get_metadata) | Stored metadata for one id |
//! | [`delete`](IndexStore::delete) | Remove documents by id |
//! | [`reset`](IndexStore::reset) | Drop every document |
//! | [`count`](IndexStore::count) | Number of stored documents |
//! | [`query`](IndexStore::query) | Nearest neighbours of a query text |

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteIndexStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{DocumentMetadata, IndexedDocument};

/// Equality filter over stored metadata. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub item_type: Option<String>,
    pub has_fulltext: Option<bool>,
    pub fulltext_source: Option<String>,
}

impl MetadataFilter {
    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        self.item_type
            .as_deref()
            .map_or(true, |t| t == meta.item_type)
            && self.has_fulltext.map_or(true, |f| f == meta.has_fulltext)
            && self
                .fulltext_source
                .as_deref()
                .map_or(true, |s| s == meta.fulltext_source)
    }
}

/// One ranked result from [`IndexStore::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub id: String,
    /// Cosine distance (`1 - similarity`); smaller is closer.
    pub distance: f32,
    pub document: String,
    pub metadata: DocumentMetadata,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace each document. Metadata is always replaced whole.
    async fn upsert(&self, docs: &[IndexedDocument]) -> Result<()>;

    async fn get_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>>;

    /// Returns the number of documents actually removed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Up to `k` hits ordered by ascending distance.
    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>>;
}

/// SHA-256 of the embedded text, used to skip re-embedding unchanged documents.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sort by ascending distance and keep the best `k`.
pub(crate) fn rank_hits(mut hits: Vec<QueryHit>, k: usize) -> Vec<QueryHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}
