//! Core data types that flow through the indexing pipeline.
//!
//! Files discovered by the scanner become [`SourceDocument`]s, which are
//! segmented and tagged into [`ChunkRecord`]s and written to the vector
//! store. Every run produces one [`RunStats`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A candidate file yielded by the scanner, before its content is read.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute (or base-relative) path on disk.
    pub path: PathBuf,
    /// Change-cache key: path relative to the config base directory,
    /// `/`-separated.
    pub key: String,
    /// First path segment under the watched root, or `"root"`.
    pub category: String,
}

/// One input file with its content. Rebuilt from disk on every run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Relative source path (same value as the change-cache key).
    pub source: String,
    pub category: String,
    pub filename: String,
    pub content: String,
    pub size_bytes: u64,
    pub fingerprint: String,
}

impl SourceDocument {
    /// File name without its final extension; the prefix of every
    /// fragment identifier.
    pub fn stem(&self) -> &str {
        match self.filename.rfind('.') {
            Some(0) | None => &self.filename,
            Some(pos) => &self.filename[..pos],
        }
    }
}

/// Metadata stored alongside every indexed fragment.
///
/// Self-describing enough to cite the origin file and position of a
/// retrieved fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub category: String,
    pub filename: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub file_hash: String,
    pub file_size: u64,
    pub processed_at: DateTime<Utc>,
}

/// One fragment ready to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A fragment returned by a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity in `[-1.0, 1.0]`; higher is closer.
    pub score: f32,
}

/// Per-file line in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub chunks: usize,
}

/// Summary of one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub fragments_added: usize,
    pub errors: usize,
    pub new_files: Vec<FileSummary>,
    pub stale_cache_entries: usize,
    pub files_pruned: usize,
    pub index_entries: Option<u64>,
    pub dry_run: bool,
}

impl RunStats {
    pub fn begin(dry_run: bool) -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            files_scanned: 0,
            files_changed: 0,
            files_processed: 0,
            files_skipped: 0,
            fragments_added: 0,
            errors: 0,
            new_files: Vec::new(),
            stale_cache_entries: 0,
            files_pruned: 0,
            index_entries: None,
            dry_run,
        }
    }

    pub fn finish(&mut self) {
        let end = Utc::now();
        let elapsed = end - self.start_time;
        self.duration_seconds = (elapsed.num_milliseconds() as f64 / 1000.0 * 100.0).round() / 100.0;
        self.end_time = Some(end);
    }

    /// Process exit code: 0 for a clean run, 1 if anything failed.
    pub fn exit_code(&self) -> u8 {
        if self.errors == 0 {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(filename: &str) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(filename),
            source: filename.to_string(),
            category: "root".to_string(),
            filename: filename.to_string(),
            content: String::new(),
            size_bytes: 0,
            fingerprint: String::new(),
        }
    }

    #[test]
    fn test_stem_strips_last_extension() {
        assert_eq!(doc("notes.md").stem(), "notes");
        assert_eq!(doc("archive.tar.txt").stem(), "archive.tar");
        assert_eq!(doc("README").stem(), "README");
        assert_eq!(doc(".env").stem(), ".env");
    }

    #[test]
    fn test_exit_code_tracks_errors() {
        let mut stats = RunStats::begin(false);
        assert_eq!(stats.exit_code(), 0);
        stats.errors = 2;
        assert_eq!(stats.exit_code(), 1);
    }

    #[test]
    fn test_finish_sets_end_time() {
        let mut stats = RunStats::begin(false);
        stats.finish();
        assert!(stats.end_time.is_some());
        assert!(stats.duration_seconds >= 0.0);
    }
}
