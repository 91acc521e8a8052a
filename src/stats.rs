//! Index statistics and health overview.
//!
//! Summarizes what is indexed: change-cache entries, fragment counts per
//! source category, index size, and the outcome of the last run. Used by
//! `ragsync stats` to confirm scheduled runs are doing their job.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::path::PathBuf;

use crate::cache::{ChangeCache, FileChangeCache};
use crate::config::Config;
use crate::db;
use crate::models::RunStats;

pub struct CategoryStats {
    pub category: String,
    pub files: i64,
    pub fragments: i64,
}

pub struct IndexStats {
    pub cache_path: PathBuf,
    pub cache_entries: usize,
    /// `None` when the index has not been created yet.
    pub fragments: Option<i64>,
    pub index_bytes: u64,
    pub categories: Vec<CategoryStats>,
    pub last_run: Option<RunStats>,
}

/// Collect statistics without creating anything that does not exist yet.
pub async fn gather_stats(config: &Config) -> Result<IndexStats> {
    let cache = FileChangeCache::open(config.resolve(&config.index.cache_path))?;
    let index_path = config.resolve(&config.index.path);

    let mut fragments = None;
    let mut categories = Vec::new();
    if index_path.exists() {
        let pool = db::connect(&index_path).await?;
        let has_table: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='fragments'",
        )
        .fetch_one(&pool)
        .await?;

        if has_table {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
                .fetch_one(&pool)
                .await?;
            fragments = Some(total);

            let rows = sqlx::query(
                r#"
                SELECT category,
                       COUNT(DISTINCT source) AS files,
                       COUNT(*) AS fragments
                FROM fragments
                GROUP BY category
                ORDER BY fragments DESC, category
                "#,
            )
            .fetch_all(&pool)
            .await?;
            categories = rows
                .iter()
                .map(|row| CategoryStats {
                    category: row.get("category"),
                    files: row.get("files"),
                    fragments: row.get("fragments"),
                })
                .collect();
        }
        pool.close().await;
    }

    let index_bytes = std::fs::metadata(&index_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let results_path = config.resolve(&config.index.results_path);
    let last_run = match std::fs::read_to_string(&results_path) {
        Ok(text) => match serde_json::from_str::<RunStats>(&text) {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(path = %results_path.display(), error = %e, "unreadable run results");
                None
            }
        },
        Err(_) => None,
    };

    Ok(IndexStats {
        cache_path: cache.path().to_path_buf(),
        cache_entries: cache.len(),
        fragments,
        index_bytes,
        categories,
        last_run,
    })
}

/// Run the stats command: gather and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let stats = gather_stats(config).await?;

    println!("ragsync index stats");
    println!("===================");
    println!();
    println!("  Index:         {}", config.resolve(&config.index.path).display());
    println!("  Size:          {}", format_bytes(stats.index_bytes));
    match stats.fragments {
        Some(n) => println!("  Fragments:     {}", n),
        None => println!("  Fragments:     (index not created yet)"),
    }
    println!(
        "  Cached files:  {} ({})",
        stats.cache_entries,
        stats.cache_path.display()
    );

    if !stats.categories.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<24} {:>6} {:>10}", "CATEGORY", "FILES", "FRAGMENTS");
        println!("  {}", "-".repeat(42));
        for c in &stats.categories {
            println!("  {:<24} {:>6} {:>10}", c.category, c.files, c.fragments);
        }
    }

    println!();
    match &stats.last_run {
        Some(run) => {
            let when = run.end_time.unwrap_or(run.start_time);
            println!("  Last run:      {}", format_relative(when));
            println!(
                "    processed {} of {} scanned files, {} fragments, {} errors{}",
                run.files_processed,
                run.files_scanned,
                run.fragments_added,
                run.errors,
                if run.dry_run { " (dry run)" } else { "" }
            );
        }
        None => println!("  Last run:      never"),
    }
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// e.g. "3 hours ago"; absolute date beyond 30 days or in the future.
fn format_relative(when: DateTime<Utc>) -> String {
    let delta = (Utc::now() - when).num_seconds();
    if delta < 0 {
        return when.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        when.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        assert_eq!(format_relative(Utc::now()), "just now");
        assert_eq!(format_relative(Utc::now() - Duration::hours(1)), "1 hour ago");
        assert_eq!(format_relative(Utc::now() - Duration::days(3)), "3 days ago");
    }

    #[tokio::test]
    async fn test_stats_on_fresh_tree_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = parse_config("[[sources]]\npath = \"docs\"\n", tmp.path()).unwrap();
        let stats = gather_stats(&config).await.unwrap();

        assert_eq!(stats.cache_entries, 0);
        assert_eq!(
            stats.cache_path,
            tmp.path().join("./processed_files_cache.json")
        );
        assert!(stats.fragments.is_none());
        assert!(stats.last_run.is_none());
        assert!(!config.resolve(&config.index.path).exists());
    }
}
