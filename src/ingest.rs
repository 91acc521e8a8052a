//! Update orchestration.
//!
//! One run moves through three phases:
//!
//! 1. **Scanning**: walk the sources, fingerprint every file and keep the
//!    ones whose fingerprint differs from the change cache.
//! 2. **Processing**: read, segment and tag each changed file in turn. A
//!    failure is counted and the file is left out of the cache, so it is
//!    retried on the next run.
//! 3. **Finalizing**: write every fragment in one batch, drop stale tails of
//!    re-indexed files, record the successful files in the cache, save the
//!    cache once and return [`RunStats`].
//!
//! Only the orchestrator mutates the cache and the vector store, and each
//! at a single point per run.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::cache::{write_atomic, ChangeCache, FileChangeCache};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::connector_fs::SourceScanner;
use crate::embedding::create_embedder;
use crate::error::FileError;
use crate::fingerprint::fingerprint_file;
use crate::models::{ChunkRecord, FileSummary, RunStats, SourceDocument, SourceFile};
use crate::sqlite_store::SqliteVectorStore;
use crate::store::VectorStore;
use crate::tagging::tag_fragments;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore the change cache and reprocess every matching file.
    pub full: bool,
    /// Scan and segment only. Nothing is written anywhere.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Scanning,
    Processing,
    Finalizing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Scanning => write!(f, "scanning"),
            RunPhase::Processing => write!(f, "processing"),
            RunPhase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// A file that made it through processing and waits for the batch write.
struct Completed {
    key: String,
    fingerprint: String,
    fragment_ids: Vec<String>,
}

pub struct Orchestrator<C: ChangeCache> {
    scanner: SourceScanner,
    chunker: Chunker,
    cache: C,
    store: Option<Arc<dyn VectorStore>>,
    prune_deleted: bool,
}

impl<C: ChangeCache> Orchestrator<C> {
    pub fn new(scanner: SourceScanner, chunker: Chunker, cache: C) -> Self {
        Self {
            scanner,
            chunker,
            cache,
            store: None,
            prune_deleted: false,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_prune_deleted(mut self, prune: bool) -> Self {
        self.prune_deleted = prune;
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn into_cache(self) -> C {
        self.cache
    }

    /// Execute one full pass. Per-file problems are counted in the
    /// returned stats; only a missing store is an `Err`.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunStats> {
        let store = match (&self.store, options.dry_run) {
            (Some(store), _) => Some(Arc::clone(store)),
            (None, true) => None,
            (None, false) => bail!("no vector store attached to the orchestrator"),
        };

        let mut stats = RunStats::begin(options.dry_run);
        tracing::info!(
            full = options.full,
            dry_run = options.dry_run,
            "starting index update"
        );

        // ---- Scanning ----
        tracing::info!(phase = %RunPhase::Scanning, "phase");
        let mut seen: HashSet<String> = HashSet::new();
        // Key prefixes of subtrees the walk could not read.
        let mut unscanned: Vec<String> = Vec::new();
        let mut changed: Vec<(SourceFile, String)> = Vec::new();

        for item in self.scanner.scan() {
            let file = match item {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!(error = %e, "scan error");
                    stats.errors += 1;
                    if let FileError::Walk { path, .. } = &e {
                        unscanned.push(self.scanner.key_for(path));
                    }
                    continue;
                }
            };
            // Overlapping sources can yield the same file twice.
            if !seen.insert(file.key.clone()) {
                continue;
            }
            stats.files_scanned += 1;

            match fingerprint_file(&file.path) {
                Ok(fingerprint) => {
                    if options.full || self.cache.is_changed(&file.key, &fingerprint) {
                        tracing::debug!(path = %file.key, "changed");
                        changed.push((file, fingerprint));
                    }
                }
                Err(e) => {
                    tracing::error!(path = %file.key, error = %e, "failed to fingerprint file");
                    stats.errors += 1;
                }
            }
        }
        stats.files_changed = changed.len();

        let stale: Vec<String> = self
            .cache
            .keys()
            .into_iter()
            .filter(|key| !seen.contains(key))
            .collect();
        stats.stale_cache_entries = stale.len();
        if !stale.is_empty() {
            tracing::info!(
                count = stale.len(),
                "cache entries refer to files that were not found in this scan"
            );
        }

        tracing::info!(
            scanned = stats.files_scanned,
            changed = stats.files_changed,
            "scan complete"
        );

        // ---- Processing ----
        tracing::info!(phase = %RunPhase::Processing, "phase");
        let processed_at = Utc::now();
        let mut pending: Vec<ChunkRecord> = Vec::new();
        let mut completed: Vec<Completed> = Vec::new();
        // Fragment id prefix -> source that claimed it first in this run.
        let mut stems: HashMap<String, String> = HashMap::new();

        for (file, fingerprint) in changed {
            let doc = match read_document(&file, fingerprint) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::error!(path = %file.key, error = %e, "failed to read file");
                    stats.errors += 1;
                    continue;
                }
            };

            if doc.content.trim().is_empty() {
                tracing::warn!(path = %doc.source, "empty file, skipping");
                stats.files_skipped += 1;
                completed.push(Completed {
                    key: doc.source,
                    fingerprint: doc.fingerprint,
                    fragment_ids: Vec::new(),
                });
                continue;
            }

            let fragments = self.chunker.chunk(&doc.content);
            if fragments.is_empty() {
                tracing::warn!(
                    path = %doc.source,
                    "no fragment reached the minimum size, skipping"
                );
                stats.files_skipped += 1;
                completed.push(Completed {
                    key: doc.source,
                    fingerprint: doc.fingerprint,
                    fragment_ids: Vec::new(),
                });
                continue;
            }

            match stems.get(doc.stem()) {
                Some(first) if first != &doc.source => tracing::warn!(
                    path = %doc.source,
                    other = %first,
                    stem = %doc.stem(),
                    "fragment ids collide with another file in this run; the later file overwrites them"
                ),
                Some(_) => {}
                None => {
                    stems.insert(doc.stem().to_string(), doc.source.clone());
                }
            }

            let records = tag_fragments(&doc, fragments, processed_at);
            tracing::info!(path = %doc.source, fragments = records.len(), "processed");
            completed.push(Completed {
                key: doc.source.clone(),
                fingerprint: doc.fingerprint.clone(),
                fragment_ids: records.iter().map(|r| r.id.clone()).collect(),
            });
            pending.extend(records);
        }

        // ---- Finalizing ----
        tracing::info!(phase = %RunPhase::Finalizing, "phase");

        let store = match store {
            Some(store) if !options.dry_run => store,
            _ => {
                for c in completed.iter().filter(|c| !c.fragment_ids.is_empty()) {
                    stats.files_processed += 1;
                    stats.new_files.push(FileSummary {
                        path: c.key.clone(),
                        chunks: c.fragment_ids.len(),
                    });
                }
                stats.fragments_added = pending.len();
                stats.finish();
                tracing::info!(
                    files = stats.files_processed,
                    fragments = stats.fragments_added,
                    "dry run complete, nothing written"
                );
                return Ok(stats);
            }
        };

        let written = if pending.is_empty() {
            Some(0)
        } else {
            match store.upsert(&pending).await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::error!(
                        fragments = pending.len(),
                        error = %e,
                        "batch write to vector store failed"
                    );
                    stats.errors += 1;
                    None
                }
            }
        };

        if let Some(n) = written {
            stats.fragments_added = n;
            for c in &completed {
                match store.remove_source(&c.key, &c.fragment_ids).await {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::debug!(path = %c.key, removed, "removed stale fragments")
                    }
                    Err(e) => {
                        tracing::error!(path = %c.key, error = %e, "failed to remove stale fragments");
                        stats.errors += 1;
                        continue;
                    }
                }
                self.cache.record(&c.key, &c.fingerprint);
                if !c.fragment_ids.is_empty() {
                    stats.files_processed += 1;
                    stats.new_files.push(FileSummary {
                        path: c.key.clone(),
                        chunks: c.fragment_ids.len(),
                    });
                }
            }
        }

        if self.prune_deleted {
            self.prune(store.as_ref(), &stale, &unscanned, &mut stats).await;
        }

        if let Err(e) = self.cache.save() {
            tracing::error!(error = %e, "failed to save change cache");
            stats.errors += 1;
        }

        stats.index_entries = store.count().await.ok();
        stats.finish();

        tracing::info!(
            scanned = stats.files_scanned,
            processed = stats.files_processed,
            fragments = stats.fragments_added,
            errors = stats.errors,
            duration_secs = stats.duration_seconds,
            "index update complete"
        );
        Ok(stats)
    }

    /// Remove index and cache entries of stale keys that live under an
    /// enabled source root that still exists. Keys inside a subtree the
    /// walk failed to read are kept: their files were not seen, not deleted.
    async fn prune(
        &mut self,
        store: &dyn VectorStore,
        stale: &[String],
        unscanned: &[String],
        stats: &mut RunStats,
    ) {
        let roots = self.scanner.existing_root_keys();
        let under_root = |key: &str| roots.iter().any(|root| is_under(key, root));
        let unreadable = |key: &str| unscanned.iter().any(|prefix| is_under(key, prefix));

        for key in stale.iter().filter(|k| under_root(k)) {
            if unreadable(key) {
                tracing::warn!(path = %key, "not pruning file under a directory that failed to scan");
                continue;
            }
            match store.remove_source(key, &[]).await {
                Ok(removed) => {
                    self.cache.remove(key);
                    stats.files_pruned += 1;
                    tracing::info!(path = %key, removed, "pruned deleted file");
                }
                Err(e) => {
                    tracing::error!(path = %key, error = %e, "failed to prune deleted file");
                    stats.errors += 1;
                }
            }
        }
    }
}

/// `key` equals `prefix` or lies below it. The empty prefix covers
/// everything.
fn is_under(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn read_document(file: &SourceFile, fingerprint: String) -> Result<SourceDocument, FileError> {
    let bytes = std::fs::read(&file.path).map_err(|source| FileError::Read {
        path: file.path.clone(),
        source,
    })?;
    let filename = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.key.clone());

    Ok(SourceDocument {
        path: file.path.clone(),
        source: file.key.clone(),
        category: file.category.clone(),
        filename,
        size_bytes: bytes.len() as u64,
        content: String::from_utf8_lossy(&bytes).into_owned(),
        fingerprint,
    })
}

/// Persist a run summary as pretty JSON, replacing the previous one.
pub fn write_results(stats: &RunStats, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("Failed to write run results: {}", path.display()))
}

/// Build every component from `config` and perform one run.
///
/// Opening the vector store is the only fatal step. The results artifact
/// is written for every run except dry runs.
pub async fn run_from_config(config: &Config, options: RunOptions) -> Result<RunStats> {
    let scanner = SourceScanner::new(&config.sources, &config.base_dir)?;
    let chunker = Chunker::from_config(&config.processing)?;
    let cache = FileChangeCache::open(config.resolve(&config.index.cache_path))?;

    let mut orchestrator =
        Orchestrator::new(scanner, chunker, cache).with_prune_deleted(config.index.prune_deleted);

    let sqlite = if options.dry_run {
        None
    } else {
        let embedder = create_embedder(&config.embedding)?;
        let store = Arc::new(
            SqliteVectorStore::open(&config.resolve(&config.index.path), embedder).await?,
        );
        orchestrator = orchestrator.with_store(store.clone());
        Some(store)
    };

    let stats = orchestrator.run(options).await?;

    if let Some(store) = sqlite {
        store.close().await;
        write_results(&stats, &config.resolve(&config.index.results_path))?;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryChangeCache;
    use crate::config::{ShortDocumentPolicy, SourceConfig};
    use crate::embedding::testing::KeywordEmbedder;
    use crate::logging::testing::capture_logs;
    use crate::store::InMemoryVectorStore;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const LONG: &str = "Rust ownership keeps memory safe.\n\nBorrowing lets code share data.\n\nLifetimes tie references to scopes.";

    fn source(path: &str) -> SourceConfig {
        SourceConfig {
            path: PathBuf::from(path),
            enabled: true,
            extensions: vec![".txt".to_string(), ".md".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }

    fn chunker() -> Chunker {
        let seps = ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect();
        Chunker::new(40, 5, 3, seps).unwrap()
    }

    struct Fixture {
        tmp: TempDir,
        store: Arc<InMemoryVectorStore>,
        embedder: Arc<KeywordEmbedder>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir_all(tmp.path().join("docs/guides")).unwrap();
            fs::write(tmp.path().join("docs/guides/rust.md"), LONG).unwrap();
            fs::write(tmp.path().join("docs/notes.txt"), "Short but meaningful note.").unwrap();
            let embedder = Arc::new(KeywordEmbedder::new(&["rust", "borrow", "note"]));
            let store = Arc::new(InMemoryVectorStore::new(embedder.clone()));
            Self {
                tmp,
                store,
                embedder,
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.tmp.path().join(rel)
        }

        fn orchestrator(&self, cache: MemoryChangeCache) -> Orchestrator<MemoryChangeCache> {
            let scanner = SourceScanner::new(&[source("docs")], self.tmp.path()).unwrap();
            Orchestrator::new(scanner, chunker(), cache).with_store(self.store.clone())
        }

        fn following_links(&self, cache: MemoryChangeCache) -> Orchestrator<MemoryChangeCache> {
            let mut docs = source("docs");
            docs.follow_symlinks = true;
            let scanner = SourceScanner::new(&[docs], self.tmp.path()).unwrap();
            Orchestrator::new(scanner, chunker(), cache).with_store(self.store.clone())
        }
    }

    #[tokio::test]
    async fn test_first_run_indexes_everything() {
        let fx = Fixture::new();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();

        assert_eq!(stats.files_scanned, 2);
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.errors, 0);
        assert!(stats.fragments_added >= 3);
        assert_eq!(stats.index_entries, Some(stats.fragments_added as u64));

        let cache = orch.cache();
        assert_eq!(cache.save_count(), 1);
        assert_eq!(
            cache.persisted().keys().cloned().collect::<Vec<_>>(),
            vec!["docs/guides/rust.md", "docs/notes.txt"]
        );

        let rec = fx.store.get("rust_0").unwrap();
        assert_eq!(rec.metadata.category, "guides");
        assert_eq!(rec.metadata.source, "docs/guides/rust.md");
        assert_eq!(fx.store.get("notes_0").unwrap().metadata.category, "root");
    }

    #[tokio::test]
    async fn test_second_run_without_changes_adds_nothing() {
        let fx = Fixture::new();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        orch.run(RunOptions::default()).await.unwrap();
        let before = orch.cache().persisted().clone();
        let calls = fx.embedder.calls();

        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.fragments_added, 0);
        assert_eq!(stats.files_changed, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(orch.cache().persisted(), &before);
        assert_eq!(fx.embedder.calls(), calls);
    }

    #[tokio::test]
    async fn test_modified_file_reindexed_and_tail_removed() {
        let fx = Fixture::new();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        orch.run(RunOptions::default()).await.unwrap();
        let before = fx.store.count().await.unwrap();
        assert!(fx.store.get("rust_2").is_some());

        fs::write(fx.path("docs/guides/rust.md"), "Rust in one line now.").unwrap();
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.files_changed, 1);
        assert_eq!(stats.fragments_added, 1);
        assert!(fx.store.count().await.unwrap() < before);
        assert!(fx.store.get("rust_1").is_none());
        assert_eq!(fx.store.get("rust_0").unwrap().text, "Rust in one line now.");
    }

    #[tokio::test]
    async fn test_empty_file_is_skipped_not_error() {
        let fx = Fixture::new();
        fs::write(fx.path("docs/empty.md"), "   \n").unwrap();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();

        assert_eq!(stats.files_scanned, 3);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.errors, 0);
        assert!(orch.cache().persisted().contains_key("docs/empty.md"));
        assert!(fx.store.get("empty_0").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_counted_and_retried() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        let locked = fx.path("docs/locked.txt");
        fs::write(&locked, "secret content here").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            return;
        }

        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files_processed, 2);
        assert!(!orch.cache().persisted().contains_key("docs/locked.txt"));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.files_changed, 1);
        assert!(orch.cache().persisted().contains_key("docs/locked.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_link_counted_and_indexed_once_fixed() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("outside")).unwrap();
        std::os::unix::fs::symlink(fx.path("outside/real.md"), fx.path("docs/broken.md")).unwrap();

        let mut orch = fx.following_links(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.exit_code(), 1);
        assert!(!orch.cache().persisted().contains_key("docs/broken.md"));

        fs::write(fx.path("outside/real.md"), "Linked note about borrowing.").unwrap();
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.files_changed, 1);
        assert!(orch.cache().persisted().contains_key("docs/broken.md"));
        assert_eq!(
            fx.store.get("broken_0").unwrap().text,
            "Linked note about borrowing."
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prune_spares_directory_that_failed_to_scan() {
        let fx = Fixture::new();
        let mut orch = fx.following_links(MemoryChangeCache::new());
        orch.run(RunOptions::default()).await.unwrap();
        assert!(fx.store.get("rust_0").is_some());

        // docs/guides turns into a dangling link; docs/notes.txt is really gone.
        fs::rename(fx.path("docs/guides"), fx.path("moved")).unwrap();
        std::os::unix::fs::symlink(fx.path("missing"), fx.path("docs/guides")).unwrap();
        fs::remove_file(fx.path("docs/notes.txt")).unwrap();

        let cache = orch.into_cache();
        let mut orch = fx.following_links(cache).with_prune_deleted(true);
        let stats = orch.run(RunOptions::default()).await.unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.stale_cache_entries, 2);
        assert_eq!(stats.files_pruned, 1);
        assert!(fx.store.get("notes_0").is_none());
        assert!(fx.store.get("rust_0").is_some());
        assert!(fx.store.get("rust_2").is_some());
        assert!(orch.cache().persisted().contains_key("docs/guides/rust.md"));
        assert!(!orch.cache().persisted().contains_key("docs/notes.txt"));
    }

    #[tokio::test]
    async fn test_colliding_stems_are_reported() {
        let fx = Fixture::new();
        fs::write(fx.path("docs/rust.txt"), "Rust again, from another folder.").unwrap();
        let logs = capture_logs();

        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 0);

        let output = logs.contents();
        assert!(output.contains("fragment ids collide"), "{}", output);
        assert!(output.contains("docs/guides/rust.md"), "{}", output);
        assert_eq!(fx.store.get("rust_0").unwrap().metadata.source, "docs/rust.txt");
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("docs/guides/rust.md", "docs/guides"));
        assert!(is_under("docs/guides", "docs/guides"));
        assert!(!is_under("docs/guidesx/a.md", "docs/guides"));
        assert!(is_under("anything", ""));
    }

    #[tokio::test]
    async fn test_failed_batch_write_records_nothing() {
        let fx = Fixture::new();
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(KeywordEmbedder::failing())));
        let scanner = SourceScanner::new(&[source("docs")], fx.tmp.path()).unwrap();
        let mut orch =
            Orchestrator::new(scanner, chunker(), MemoryChangeCache::new()).with_store(store);

        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.fragments_added, 0);
        assert_eq!(stats.files_processed, 0);
        assert!(orch.cache().persisted().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fx = Fixture::new();
        let scanner = SourceScanner::new(&[source("docs")], fx.tmp.path()).unwrap();
        let mut orch = Orchestrator::new(scanner, chunker(), MemoryChangeCache::new());

        let stats = orch
            .run(RunOptions {
                dry_run: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert!(stats.dry_run);
        assert!(stats.fragments_added > 0);
        assert_eq!(orch.cache().save_count(), 0);
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_store_is_fatal_outside_dry_run() {
        let fx = Fixture::new();
        let scanner = SourceScanner::new(&[source("docs")], fx.tmp.path()).unwrap();
        let mut orch = Orchestrator::new(scanner, chunker(), MemoryChangeCache::new());
        assert!(orch.run(RunOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_full_run_ignores_cache() {
        let fx = Fixture::new();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let first = orch.run(RunOptions::default()).await.unwrap();
        let stats = orch
            .run(RunOptions {
                full: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.fragments_added, first.fragments_added);
        assert_eq!(fx.store.count().await.unwrap(), first.fragments_added as u64);
    }

    #[tokio::test]
    async fn test_deleted_file_kept_unless_pruning() {
        let fx = Fixture::new();
        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        orch.run(RunOptions::default()).await.unwrap();
        fs::remove_file(fx.path("docs/notes.txt")).unwrap();

        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.stale_cache_entries, 1);
        assert_eq!(stats.files_pruned, 0);
        assert!(fx.store.get("notes_0").is_some());

        let cache = orch.into_cache();
        let mut orch = fx.orchestrator(cache).with_prune_deleted(true);
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.files_pruned, 1);
        assert!(fx.store.get("notes_0").is_none());
        assert!(!orch.cache().persisted().contains_key("docs/notes.txt"));
    }

    #[tokio::test]
    async fn test_short_document_policy() {
        let fx = Fixture::new();
        fs::write(fx.path("docs/tiny.txt"), "ok").unwrap();

        let mut orch = fx.orchestrator(MemoryChangeCache::new());
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.files_skipped, 1);
        assert!(fx.store.get("tiny_0").is_none());

        let scanner = SourceScanner::new(&[source("docs")], fx.tmp.path()).unwrap();
        let keep = chunker().with_short_documents(ShortDocumentPolicy::Keep);
        let mut orch = Orchestrator::new(scanner, keep, MemoryChangeCache::new())
            .with_store(fx.store.clone());
        orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(fx.store.get("tiny_0").unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_overlapping_sources_scan_each_file_once() {
        let fx = Fixture::new();
        let scanner =
            SourceScanner::new(&[source("docs"), source("docs/guides")], fx.tmp.path()).unwrap();
        let mut orch = Orchestrator::new(scanner, chunker(), MemoryChangeCache::new())
            .with_store(fx.store.clone());
        let stats = orch.run(RunOptions::default()).await.unwrap();
        assert_eq!(stats.files_scanned, 2);
    }

    #[test]
    fn test_write_results_is_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("last_update_results.json");
        let mut stats = RunStats::begin(false);
        stats.fragments_added = 7;
        stats.finish();
        write_results(&stats, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["fragments_added"], 7);
        assert!(value["end_time"].is_string());
    }
}
