//! In-memory [`VectorStore`].
//!
//! Records live in a `BTreeMap` behind a `RwLock`. Queries are brute-force
//! cosine similarity over every stored vector.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::VectorStore;
use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{ChunkRecord, ScoredChunk};

struct StoredRecord {
    record: ChunkRecord,
    vector: Vec<f32>,
}

pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    records: RwLock<BTreeMap<String, StoredRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Snapshot of a stored record by id.
    pub fn get(&self, id: &str) -> Option<ChunkRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(id).map(|s| s.record.clone()))
    }

    /// All stored ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.records
            .read()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for (record, vector) in records.iter().zip(vectors) {
            stored.insert(
                record.id.clone(),
                StoredRecord {
                    record: record.clone(),
                    vector,
                },
            );
        }
        Ok(records.len())
    }

    async fn remove_source(&self, source: &str, keep_ids: &[String]) -> Result<usize> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|id, s| s.record.metadata.source != source || keep_ids.contains(id));
        Ok(before - stored.len())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;

        let stored = self.records.read().map_err(|_| poisoned())?;
        let mut scored: Vec<ScoredChunk> = stored
            .values()
            .map(|s| ScoredChunk {
                id: s.record.id.clone(),
                text: s.record.text.clone(),
                metadata: s.record.metadata.clone(),
                score: cosine_similarity(&query, &s.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().map_err(|_| poisoned())?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::KeywordEmbedder;
    use crate::models::ChunkMetadata;
    use chrono::Utc;

    fn record(id: &str, source: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                category: "root".to_string(),
                filename: source.to_string(),
                chunk_id: id.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                file_hash: "h".to_string(),
                file_size: text.len() as u64,
                processed_at: Utc::now(),
            },
        }
    }

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(KeywordEmbedder::new(&["cat", "dog", "fish"])))
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = store();
        store.upsert(&[record("a_0", "a.txt", "cat")]).await.unwrap();
        store.upsert(&[record("a_0", "a.txt", "dog")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a_0").unwrap().text, "dog");
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = store();
        store
            .upsert(&[
                record("a_0", "a.txt", "cat cat"),
                record("b_0", "b.txt", "dog"),
                record("c_0", "c.txt", "fish"),
            ])
            .await
            .unwrap();
        let hits = store.query("dog", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b_0");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_remove_source_keeps_listed_ids() {
        let store = store();
        store
            .upsert(&[
                record("a_0", "a.txt", "cat"),
                record("a_1", "a.txt", "dog"),
                record("b_0", "b.txt", "fish"),
            ])
            .await
            .unwrap();
        let removed = store
            .remove_source("a.txt", &["a_0".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.ids(), vec!["a_0", "b_0"]);
    }

    #[tokio::test]
    async fn test_failed_embedding_writes_nothing() {
        let store = InMemoryVectorStore::new(Arc::new(KeywordEmbedder::failing()));
        assert!(store.upsert(&[record("a_0", "a.txt", "x")]).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
