//! SQLite-backed [`IndexStore`].
//!
//! One row per document in the `documents` table (see [`crate::migrate`]).
//! Vectors are stored as little-endian `f32` BLOBs next to the text, the
//! model name, and a SHA-256 of the text; a re-upsert with the same text and
//! model keeps the stored vector instead of calling the embedder again.
//! Query is a brute-force cosine scan.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{content_hash, rank_hits, IndexStore, MetadataFilter, QueryHit};
use crate::config::Config;
use crate::db;
use crate::embedding::{
    self,
    blob_to_vec, cosine_similarity, embed_query, vec_to_blob, EmbeddingProvider,
};
use crate::migrate;
use crate::models::{DocumentMetadata, IndexedDocument};

pub struct SqliteIndexStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_batch_size: usize,
}

impl SqliteIndexStore {
    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            pool,
            embedder,
            embed_batch_size: 64,
        }
    }

    /// Open (creating and migrating if needed) the index at `path`.
    pub async fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect_index(path)
            .await
            .with_context(|| format!("Failed to open index database {}", path.display()))?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool, embedder))
    }

    /// Open the index named by `config.index.path` with the configured embedder.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        Ok(Self::open(&config.index.path, embedder)
            .await?
            .with_embed_batch_size(config.embedding.batch_size))
    }

    pub fn with_embed_batch_size(mut self, n: usize) -> Self {
        self.embed_batch_size = n.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Timestamp (unix seconds) of the most recent write, if any.
    pub async fn last_write(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }

    async fn stored_hashes(&self, ids: &[&str]) -> Result<HashMap<String, (String, String)>> {
        let mut out = HashMap::new();
        for id in ids {
            let row = sqlx::query(
                "SELECT content_hash, COALESCE(model, '') AS model FROM documents WHERE id = ? AND embedding IS NOT NULL",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(r) = row {
                out.insert(id.to_string(), (r.get("content_hash"), r.get("model")));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn upsert(&self, docs: &[IndexedDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let model = self.embedder.model_name().to_string();
        let hashes: Vec<String> = docs.iter().map(|d| content_hash(&d.text)).collect();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        let stored = self.stored_hashes(&ids).await?;

        let stale: Vec<usize> = (0..docs.len())
            .filter(|&i| {
                stored
                    .get(&docs[i].id)
                    .map_or(true, |(h, m)| *h != hashes[i] || *m != model)
            })
            .collect();

        let mut vectors: HashMap<usize, Vec<f32>> = HashMap::new();
        for chunk in stale.chunks(self.embed_batch_size) {
            let texts: Vec<String> = chunk.iter().map(|&i| docs[i].text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                );
            }
            vectors.extend(chunk.iter().copied().zip(embedded));
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (i, doc) in docs.iter().enumerate() {
            let metadata_json = serde_json::to_string(&doc.metadata)?;
            match vectors.remove(&i) {
                Some(vec) => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (id, document, metadata_json, content_hash,
                                               embedding, model, dims, updated_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            document = excluded.document,
                            metadata_json = excluded.metadata_json,
                            content_hash = excluded.content_hash,
                            embedding = excluded.embedding,
                            model = excluded.model,
                            dims = excluded.dims,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&doc.id)
                    .bind(&doc.text)
                    .bind(&metadata_json)
                    .bind(&hashes[i])
                    .bind(vec_to_blob(&vec))
                    .bind(&model)
                    .bind(vec.len() as i64)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    // Text and model unchanged: keep the stored vector.
                    sqlx::query(
                        "UPDATE documents SET document = ?, metadata_json = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&doc.text)
                    .bind(&metadata_json)
                    .bind(now)
                    .bind(&doc.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query("SELECT metadata_json FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let json: String = r.get("metadata_json");
                let meta = serde_json::from_str(&json)
                    .with_context(|| format!("corrupt metadata for document {}", id))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            removed += sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>> {
        let q = embed_query(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM documents WHERE embedding IS NOT NULL AND dims = ?",
        )
        .bind(q.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let json: String = row.get("metadata_json");
            let metadata: DocumentMetadata = match serde_json::from_str(&json) {
                Ok(m) => m,
                Err(e) => {
                    let id: String = row.get("id");
                    tracing::warn!(id = %id, error = %e, "skipping document with corrupt metadata");
                    continue;
                }
            };
            if !filter.map_or(true, |f| f.matches(&metadata)) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            hits.push(QueryHit {
                id: row.get("id"),
                distance: 1.0 - cosine_similarity(&q, &blob_to_vec(&blob)),
                document: row.get("document"),
                metadata,
            });
        }

        Ok(rank_hits(hits, k))
    }
}
