//! Semantic search over the index, enriched from the library.
//!
//! Hits come from [`IndexStore::query`]. Each hit is then looked up in the
//! library so results show the record as it is now (title, creators,
//! abstract), falling back to the metadata stored at index time when the
//! library is unavailable or the item has since been removed.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::extract::{truncate_chars, ExtractLimits};
use crate::source::{LibrarySource, ZoteroReader};
use crate::store::{IndexStore, MetadataFilter, QueryHit, SqliteIndexStore};

const SNIPPET_CHARS: usize = 240;

/// One enriched search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub key: String,
    /// Cosine similarity, `1 - distance`.
    pub similarity: f32,
    pub item_type: String,
    pub title: String,
    pub creators: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_note: Option<String>,
    pub doi: String,
    pub has_fulltext: bool,
    pub fulltext_source: String,
    pub snippet: String,
}

impl SearchResult {
    fn from_hit(hit: &QueryHit) -> Self {
        let meta = &hit.metadata;
        Self {
            key: hit.id.clone(),
            similarity: 1.0 - hit.distance,
            item_type: meta.item_type.clone(),
            title: meta.title.clone(),
            creators: meta.creators.clone(),
            date: meta.date.clone(),
            abstract_note: None,
            doi: meta.doi.clone(),
            has_fulltext: meta.has_fulltext,
            fulltext_source: meta.fulltext_source.clone(),
            snippet: snippet(&hit.document),
        }
    }
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_chars(&flat, SNIPPET_CHARS);
    if cut.len() < flat.len() {
        format!("{}...", cut)
    } else {
        cut
    }
}

/// Query the index and enrich the hits.
///
/// A blank query returns no results without touching the store.
pub async fn search(
    store: &dyn IndexStore,
    source: Option<&dyn LibrarySource>,
    query: &str,
    k: usize,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let hits = store.query(query, k, filter).await?;
    let mut results = Vec::with_capacity(hits.len());
    for hit in &hits {
        let mut result = SearchResult::from_hit(hit);
        if let Some(source) = source {
            match source.get_item(&hit.id).await {
                Ok(Some(record)) => {
                    let creators = record.creators_text();
                    if !creators.is_empty() {
                        result.creators = creators;
                    }
                    if let Some(title) = record.title.filter(|t| !t.is_empty()) {
                        result.title = title;
                    }
                    result.abstract_note = record.abstract_note.filter(|a| !a.is_empty());
                }
                Ok(None) => {
                    tracing::debug!(key = %hit.id, "indexed item no longer in library");
                }
                Err(e) => {
                    tracing::warn!(key = %hit.id, error = %e, "enrichment lookup failed");
                }
            }
        }
        results.push(result);
    }
    Ok(results)
}

/// `zidx search`: run a query and print ranked results.
pub async fn run_search(
    config: &Config,
    query: &str,
    limit: usize,
    filter: MetadataFilter,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let store = SqliteIndexStore::from_config(config).await?;
    let reader = match ZoteroReader::open(&config.source, ExtractLimits::from(&config.extraction))
        .await
    {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(error = %e, "library unavailable; showing stored metadata only");
            None
        }
    };

    let filter = (filter != MetadataFilter::default()).then_some(&filter);
    let results = search(
        &store,
        reader.as_ref().map(|r| r as &dyn LibrarySource),
        query,
        limit,
        filter,
    )
    .await?;
    store.pool().close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        let title = if r.title.is_empty() { "(untitled)" } else { &r.title };
        println!("{}. [{:.3}] {}", i + 1, r.similarity, title);
        println!("    key: {}  type: {}  date: {}", r.key, r.item_type, r.date);
        if !r.creators.is_empty() {
            println!("    by: {}", r.creators);
        }
        if r.has_fulltext {
            println!("    fulltext: {}", r.fulltext_source);
        }
        println!("    > {}", r.snippet);
        println!();
    }
    Ok(())
}
