//! TOML configuration parsing and validation.
//!
//! The configuration file is loaded once at startup. Relative paths inside
//! it are resolved against the directory containing the file, which is also
//! the stable root used to key the change cache.
//!
//! ```toml
//! [[sources]]
//! path = "./data_sources/incoming"
//! extensions = [".txt", ".md"]
//!
//! [processing]
//! chunk_size = 2000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [index]
//! path = "./index/vectors.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Directory containing the config file. Set by [`load_config`].
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Path the config was loaded from. Set by [`load_config`].
    #[serde(skip)]
    pub config_path: PathBuf,
}

/// One watched directory.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_true() -> bool {
    true
}
fn default_extensions() -> Vec<String> {
    vec![".txt".to_string(), ".md".to_string()]
}

/// What to do with a non-blank document whose every fragment falls below
/// `min_chunk_size`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShortDocumentPolicy {
    #[default]
    Drop,
    Keep,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
    #[serde(default)]
    pub short_documents: ShortDocumentPolicy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            separators: default_separators(),
            short_documents: ShortDocumentPolicy::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    10
}
fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "! ", "? ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,
    /// Remove index entries of files that disappeared from the source tree.
    #[serde(default)]
    pub prune_deleted: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            cache_path: default_cache_path(),
            results_path: default_results_path(),
            prune_deleted: false,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./index/vectors.sqlite")
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("./processed_files_cache.json")
}
fn default_results_path() -> PathBuf {
    PathBuf::from("./logs/last_update_results.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: default_log_file(),
            max_file_size_mb: default_max_file_size_mb(),
            backup_count: default_backup_count(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/auto_update.log")
}
fn default_max_file_size_mb() -> u64 {
    10
}
fn default_backup_count() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_cron_expression")]
    pub cron_expression: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    /// Hard limit for every externally invoked `crontab` process.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            cron_expression: default_cron_expression(),
            poll_interval_secs: default_poll_interval_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    60
}
fn default_cron_expression() -> String {
    "0 6 * * *".to_string()
}
fn default_poll_interval_secs() -> u64 {
    1
}
fn default_retry_backoff_secs() -> u64 {
    60
}
fn default_cycle_timeout_secs() -> u64 {
    3600
}
fn default_command_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Resolve a configured path against the config file's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Parse and validate a configuration from TOML text.
///
/// `base_dir` is the directory relative paths are resolved against.
pub fn parse_config(content: &str, base_dir: &Path) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.base_dir = base_dir.to_path_buf();
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let base_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut config = parse_config(&content, &base_dir)?;
    config.config_path = path.to_path_buf();
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        bail!("at least one [[sources]] entry is required");
    }
    for source in &config.sources {
        if source.extensions.is_empty() {
            bail!(
                "sources entry '{}' must watch at least one extension",
                source.path.display()
            );
        }
    }

    let p = &config.processing;
    if p.chunk_size == 0 {
        bail!("processing.chunk_size must be > 0");
    }
    if p.chunk_overlap >= p.chunk_size {
        bail!(
            "processing.chunk_overlap ({}) must be < processing.chunk_size ({})",
            p.chunk_overlap,
            p.chunk_size
        );
    }
    if p.min_chunk_size > p.chunk_size {
        bail!("processing.min_chunk_size must be <= processing.chunk_size");
    }
    if p.separators.is_empty() {
        bail!("processing.separators must not be empty");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.logging.max_file_size_mb == 0 {
        bail!("logging.max_file_size_mb must be > 0");
    }

    let s = &config.scheduler;
    if s.interval_minutes == 0 {
        bail!("scheduler.interval_minutes must be > 0");
    }
    if s.poll_interval_secs == 0 {
        bail!("scheduler.poll_interval_secs must be > 0");
    }
    if s.cron_expression.split_whitespace().count() != 5 {
        bail!(
            "scheduler.cron_expression must have five fields, got '{}'",
            s.cron_expression
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[sources]]
path = "./docs"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL, Path::new("/srv/kb")).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[0].extensions, vec![".txt", ".md"]);
        assert_eq!(config.processing.chunk_size, 2000);
        assert_eq!(config.processing.chunk_overlap, 200);
        assert_eq!(config.processing.min_chunk_size, 10);
        assert_eq!(config.processing.separators.last().unwrap(), "");
        assert_eq!(config.processing.short_documents, ShortDocumentPolicy::Drop);
        assert_eq!(config.scheduler.cron_expression, "0 6 * * *");
        assert!(!config.index.prune_deleted);
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let config = parse_config(MINIMAL, Path::new("/srv/kb")).unwrap();
        assert_eq!(
            config.resolve(&config.sources[0].path),
            PathBuf::from("/srv/kb/./docs")
        );
        assert_eq!(
            config.resolve(Path::new("/abs/cache.json")),
            PathBuf::from("/abs/cache.json")
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let text = format!("{}\n[processing]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&text, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let text = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        assert!(parse_config(&text, Path::new(".")).is_err());
    }

    #[test]
    fn test_rejects_malformed_cron() {
        let text = format!("{}\n[scheduler]\ncron_expression = \"0 6 *\"\n", MINIMAL);
        let err = parse_config(&text, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("five fields"));
    }

    #[test]
    fn test_requires_sources() {
        assert!(parse_config("sources = []\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_short_document_policy_parses() {
        let text = format!("{}\n[processing]\nshort_documents = \"keep\"\n", MINIMAL);
        let config = parse_config(&text, Path::new(".")).unwrap();
        assert_eq!(config.processing.short_documents, ShortDocumentPolicy::Keep);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
