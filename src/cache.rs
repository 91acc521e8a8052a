//! Change cache: the persisted map from file key to last indexed fingerprint.
//!
//! The cache is the only source of truth for "is this file new or
//! modified". Updates accumulate in memory during a run and are flushed
//! once, after every file has been attempted.
//!
//! [`FileChangeCache`] persists the map as pretty-printed JSON and replaces
//! the previous file atomically (write to a sibling temp file, then rename),
//! so a crash can never leave a truncated cache behind.
//! [`MemoryChangeCache`] backs unit tests.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Abstract persistent key → fingerprint map.
pub trait ChangeCache: Send {
    /// Load the persisted map, replacing the in-memory state. A missing or
    /// corrupt backing store yields an empty cache.
    fn load(&mut self) -> Result<()>;

    /// `true` if `key` is unknown or was recorded with a different fingerprint.
    fn is_changed(&self, key: &str, fingerprint: &str) -> bool;

    /// Set or overwrite the entry for `key`.
    fn record(&mut self, key: &str, fingerprint: &str);

    /// Drop the entry for `key`. Returns whether it existed.
    fn remove(&mut self, key: &str) -> bool;

    /// All keys, in sorted order.
    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the full map, replacing the previous version.
    fn save(&mut self) -> Result<()>;
}

/// JSON-file-backed change cache.
#[derive(Debug)]
pub struct FileChangeCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileChangeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Create and immediately [`load`](ChangeCache::load).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::new(path);
        cache.load()?;
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl ChangeCache for FileChangeCache {
    fn load(&mut self) -> Result<()> {
        self.entries.clear();
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "change cache not found, starting empty");
            return Ok(());
        }

        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read change cache, starting empty");
                return Ok(());
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&text) {
            Ok(entries) => {
                tracing::debug!(entries = entries.len(), "loaded change cache");
                self.entries = entries;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "change cache is corrupt, starting empty");
            }
        }
        Ok(())
    }

    fn is_changed(&self, key: &str, fingerprint: &str) -> bool {
        self.entries.get(key).map(String::as_str) != Some(fingerprint)
    }

    fn record(&mut self, key: &str, fingerprint: &str) {
        self.entries.insert(key.to_string(), fingerprint.to_string());
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn save(&mut self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to save change cache: {}", self.path.display()))
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory change cache. `save` only snapshots the current entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryChangeCache {
    entries: BTreeMap<String, String>,
    persisted: BTreeMap<String, String>,
    saves: usize,
}

impl MemoryChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entries as of the last `save`.
    pub fn persisted(&self) -> &BTreeMap<String, String> {
        &self.persisted
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl ChangeCache for MemoryChangeCache {
    fn load(&mut self) -> Result<()> {
        self.entries = self.persisted.clone();
        Ok(())
    }

    fn is_changed(&self, key: &str, fingerprint: &str) -> bool {
        self.entries.get(key).map(String::as_str) != Some(fingerprint)
    }

    fn record(&mut self, key: &str, fingerprint: &str) {
        self.entries.insert(key.to_string(), fingerprint.to_string());
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn save(&mut self) -> Result<()> {
        self.persisted = self.entries.clone();
        self.saves += 1;
        Ok(())
    }
}
