//! SQLite-backed [`VectorStore`].
//!
//! One row per fragment in the `fragments` table, with the embedding stored
//! as a little-endian `f32` BLOB next to its metadata. Upserts run in a
//! single transaction keyed on `id`. Queries load every vector of the index
//! and rank by cosine similarity in process.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::migrate;
use crate::models::{ChunkMetadata, ChunkRecord, ScoredChunk};
use crate::store::VectorStore;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorStore {
    /// Open or create the index at `path`. Failure here is fatal for the
    /// run: nothing can be indexed without a store.
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool)
            .await
            .with_context(|| format!("Failed to initialize index schema: {}", path.display()))?;
        Ok(Self { pool, embedder })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: &SqliteRow) -> Result<(ChunkRecord, Vec<f32>)> {
    let id: String = row.get("id");
    let processed_at: String = row.get("processed_at");
    let processed_at = DateTime::parse_from_rfc3339(&processed_at)
        .map_err(|e| anyhow!("bad processed_at on fragment {}: {}", id, e))?
        .with_timezone(&Utc);
    let chunk_index: i64 = row.get("chunk_index");
    let total_chunks: i64 = row.get("total_chunks");
    let file_size: i64 = row.get("file_size");
    let blob: Vec<u8> = row.get("embedding");

    let record = ChunkRecord {
        text: row.get("text"),
        metadata: ChunkMetadata {
            source: row.get("source"),
            category: row.get("category"),
            filename: row.get("filename"),
            chunk_id: id.clone(),
            chunk_index: chunk_index as usize,
            total_chunks: total_chunks as usize,
            file_hash: row.get("file_hash"),
            file_size: file_size as u64,
            processed_at,
        },
        id,
    };
    Ok((record, blob_to_vec(&blob)))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // Embed everything before touching the database so a backend
        // failure leaves the index unchanged.
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != records.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} fragments",
                vectors.len(),
                records.len()
            );
        }

        let model = self.embedder.model_name().to_string();
        let mut tx = self.pool.begin().await?;
        for (record, vector) in records.iter().zip(vectors.iter()) {
            let m = &record.metadata;
            sqlx::query(
                r#"
                INSERT INTO fragments (id, source, category, filename, chunk_index,
                                       total_chunks, file_hash, file_size, processed_at,
                                       text, embedding, model, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    category = excluded.category,
                    filename = excluded.filename,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    file_hash = excluded.file_hash,
                    file_size = excluded.file_size,
                    processed_at = excluded.processed_at,
                    text = excluded.text,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims
                "#,
            )
            .bind(&record.id)
            .bind(&m.source)
            .bind(&m.category)
            .bind(&m.filename)
            .bind(m.chunk_index as i64)
            .bind(m.total_chunks as i64)
            .bind(&m.file_hash)
            .bind(m.file_size as i64)
            .bind(m.processed_at.to_rfc3339())
            .bind(&record.text)
            .bind(vec_to_blob(vector))
            .bind(&model)
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len())
    }

    async fn remove_source(&self, source: &str, keep_ids: &[String]) -> Result<usize> {
        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT id FROM fragments WHERE source = ?")
            .bind(source)
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for row in rows {
            let id: String = row.get("id");
            if keep.contains(id.as_str()) {
                continue;
            }
            sqlx::query("DELETE FROM fragments WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            removed += 1;
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;

        let rows = sqlx::query(
            r#"
            SELECT id, source, category, filename, chunk_index, total_chunks,
                   file_hash, file_size, processed_at, text, embedding
            FROM fragments
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let (record, vector) = row_to_record(row)?;
            scored.push(ScoredChunk {
                score: cosine_similarity(&query, &vector),
                id: record.id,
                text: record.text,
                metadata: record.metadata,
            });
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::KeywordEmbedder;
    use tempfile::TempDir;

    fn record(id: &str, source: &str, index: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                category: "guides".to_string(),
                filename: "a.md".to_string(),
                chunk_id: id.to_string(),
                chunk_index: index,
                total_chunks: 2,
                file_hash: "abc".to_string(),
                file_size: 10,
                processed_at: Utc::now(),
            },
        }
    }

    async fn open(tmp: &TempDir) -> SqliteVectorStore {
        let embedder = Arc::new(KeywordEmbedder::new(&["alpha", "beta"]));
        SqliteVectorStore::open(&tmp.path().join("index").join("v.sqlite"), embedder)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_query_round_trip_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let a = record("a_0", "docs/a.md", 0, "alpha alpha");
        let b = record("a_1", "docs/a.md", 1, "beta");
        store.upsert(&[a.clone(), b]).await.unwrap();

        let hits = store.query("alpha", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a_0");
        assert_eq!(hits[0].metadata.source, a.metadata.source);
        assert_eq!(hits[0].metadata.category, "guides");
        assert_eq!(hits[0].metadata.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.upsert(&[record("a_0", "a", 0, "alpha")]).await.unwrap();
        store.upsert(&[record("a_0", "a", 0, "beta")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query("beta", 5).await.unwrap();
        assert_eq!(hits[0].text, "beta");
    }

    #[tokio::test]
    async fn test_remove_source_tail() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store
            .upsert(&[
                record("a_0", "a", 0, "alpha"),
                record("a_1", "a", 1, "beta"),
                record("b_0", "b", 0, "beta"),
            ])
            .await
            .unwrap();
        let removed = store.remove_source("a", &["a_0".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 2);
        let sources: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT source FROM fragments ORDER BY source")
                .fetch_all(&store.pool)
                .await
                .unwrap();
        assert_eq!(sources, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp).await;
            store.upsert(&[record("a_0", "a", 0, "alpha")]).await.unwrap();
            store.close().await;
        }
        let store = open(&tmp).await;
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_index_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.sqlite");
        let store = SqliteVectorStore::open(&path, Arc::new(KeywordEmbedder::failing()))
            .await
            .unwrap();
        assert!(store.upsert(&[record("a_0", "a", 0, "x")]).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
