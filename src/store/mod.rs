//! Vector store abstraction.
//!
//! The orchestrator only ever talks to a [`VectorStore`]. Two backends ship:
//! [`SqliteVectorStore`](crate::sqlite_store::SqliteVectorStore) for the
//! persistent index and [`InMemoryVectorStore`](memory::InMemoryVectorStore)
//! for tests and dry experiments.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert or replace records by id, as one batch |
//! | [`remove_source`](VectorStore::remove_source) | Drop a file's records except the given ids |
//! | [`query`](VectorStore::query) | Top-k cosine similarity search |
//! | [`count`](VectorStore::count) | Number of stored records |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkRecord, ScoredChunk};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and write `records`, replacing any existing entry with the
    /// same id. Either every record is written or none is.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// Delete the records whose `metadata.source` is `source` and whose id
    /// is not in `keep_ids`. Returns the number removed.
    async fn remove_source(&self, source: &str, keep_ids: &[String]) -> Result<usize>;

    /// The `k` records most similar to `text`, best first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    async fn count(&self) -> Result<u64>;
}

pub use memory::InMemoryVectorStore;
