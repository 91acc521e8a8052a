//! Fragment tagging: attach identity and provenance to each fragment.

use chrono::{DateTime, Utc};

use crate::models::{ChunkMetadata, ChunkRecord, SourceDocument};

/// Turn the ordered fragments of one document into index records.
///
/// Identifiers are `{stem}_{position}` with positions `0..n` in document
/// order, so re-tagging an unchanged document reproduces the same ids and
/// an upsert replaces the previous entries in place.
pub fn tag_fragments(
    doc: &SourceDocument,
    fragments: Vec<String>,
    processed_at: DateTime<Utc>,
) -> Vec<ChunkRecord> {
    let total = fragments.len();
    let stem = doc.stem();

    fragments
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let id = format!("{}_{}", stem, index);
            ChunkRecord {
                metadata: ChunkMetadata {
                    source: doc.source.clone(),
                    category: doc.category.clone(),
                    filename: doc.filename.clone(),
                    chunk_id: id.clone(),
                    chunk_index: index,
                    total_chunks: total,
                    file_hash: doc.fingerprint.clone(),
                    file_size: doc.size_bytes,
                    processed_at,
                },
                id,
                text,
            }
        })
        .collect()
}
