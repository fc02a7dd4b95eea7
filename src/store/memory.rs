//! In-memory [`IndexStore`] for tests and embedded use.
//!
//! Documents live in a `HashMap` behind a `tokio::sync::RwLock`. Query is a
//! brute-force cosine scan over every stored vector.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{content_hash, rank_hits, IndexStore, MetadataFilter, QueryHit};
use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider, HashProvider};
use crate::models::{DocumentMetadata, IndexedDocument};

struct Entry {
    doc: IndexedDocument,
    hash: String,
    vector: Vec<f32>,
}

pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Entry>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            embedder,
        }
    }

    /// Stored text for `id`, if any.
    pub async fn document(&self, id: &str) -> Option<String> {
        self.docs.read().await.get(id).map(|e| e.doc.text.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(HashProvider::new(64)))
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn upsert(&self, docs: &[IndexedDocument]) -> Result<()> {
        // Embed outside the lock; only changed texts hit the provider.
        let stale: Vec<usize> = {
            let stored = self.docs.read().await;
            docs.iter()
                .enumerate()
                .filter(|(_, d)| {
                    stored
                        .get(&d.id)
                        .map_or(true, |e| e.hash != content_hash(&d.text))
                })
                .map(|(i, _)| i)
                .collect()
        };
        let texts: Vec<String> = stale.iter().map(|&i| docs[i].text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            );
        }
        let mut fresh: HashMap<usize, Vec<f32>> = stale.into_iter().zip(vectors).collect();

        let mut stored = self.docs.write().await;
        for (i, doc) in docs.iter().enumerate() {
            let vector = match fresh.remove(&i) {
                Some(v) => v,
                None => stored
                    .get(&doc.id)
                    .map(|e| e.vector.clone())
                    .unwrap_or_default(),
            };
            stored.insert(
                doc.id.clone(),
                Entry {
                    doc: doc.clone(),
                    hash: content_hash(&doc.text),
                    vector,
                },
            );
        }
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.docs.read().await.get(id).map(|e| e.doc.metadata.clone()))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.docs.write().await;
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count())
    }

    async fn reset(&self) -> Result<()> {
        self.docs.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.docs.read().await.len())
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>> {
        let q = embed_query(self.embedder.as_ref(), text).await?;
        let stored = self.docs.read().await;
        let hits = stored
            .values()
            .filter(|e| filter.map_or(true, |f| f.matches(&e.doc.metadata)))
            .map(|e| QueryHit {
                id: e.doc.id.clone(),
                distance: 1.0 - cosine_similarity(&q, &e.vector),
                document: e.doc.text.clone(),
                metadata: e.doc.metadata.clone(),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }
}
