//! Filesystem source scanner.
//!
//! Walks every enabled `[[sources]]` root depth-first and yields the files
//! whose extension is watched. Disabled sources are skipped silently and
//! missing roots are skipped with a warning. The walk is lazy: files are
//! yielded as the directory tree is read.
//!
//! Traversal order is sorted by file name within each directory for
//! readable logs, but nothing downstream depends on it.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SourceConfig;
use crate::error::FileError;
use crate::models::SourceFile;

/// Directories that never contain indexable documents.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

struct ScanRoot {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

pub struct SourceScanner {
    base_dir: PathBuf,
    roots: Vec<ScanRoot>,
}

impl SourceScanner {
    /// Prepare a scanner over the enabled sources. Source paths are
    /// resolved against `base_dir`, which is also the root for file keys.
    pub fn new(sources: &[SourceConfig], base_dir: &Path) -> Result<Self> {
        let mut roots = Vec::new();
        for source in sources {
            if !source.enabled {
                tracing::debug!(path = %source.path.display(), "source disabled, skipping");
                continue;
            }

            let root = resolve_dir(&base_dir.join(&source.path));

            let include_patterns: Vec<String> = source
                .extensions
                .iter()
                .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
                .collect();
            let include = build_globset(&include_patterns)
                .with_context(|| format!("invalid extensions for source {}", root.display()))?;

            let mut exclude_patterns: Vec<String> =
                DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
            exclude_patterns.extend(source.exclude_globs.iter().cloned());
            let exclude = build_globset(&exclude_patterns)
                .with_context(|| format!("invalid exclude_globs for source {}", root.display()))?;

            roots.push(ScanRoot {
                root,
                include,
                exclude,
                follow_symlinks: source.follow_symlinks,
            });
        }

        Ok(Self {
            base_dir: resolve_dir(base_dir),
            roots,
        })
    }

    /// Resolved roots of the enabled sources that currently exist on disk.
    pub fn existing_roots(&self) -> Vec<&Path> {
        self.roots
            .iter()
            .map(|r| r.root.as_path())
            .filter(|p| p.is_dir())
            .collect()
    }

    /// Key prefix (relative to the base directory) of every enabled root
    /// that exists on disk.
    pub fn existing_root_keys(&self) -> Vec<String> {
        self.existing_roots()
            .into_iter()
            .map(|root| self.key_for(root))
            .collect()
    }

    /// Cache key of an arbitrary path under the base directory, such as the
    /// path reported by a failed walk.
    pub fn key_for(&self, path: &Path) -> String {
        relative_key(&self.base_dir, path)
    }

    /// Lazily enumerate matching files under every enabled root.
    pub fn scan(&self) -> impl Iterator<Item = Result<SourceFile, FileError>> + '_ {
        self.roots.iter().flat_map(move |scan_root| self.scan_root(scan_root))
    }

    fn scan_root<'a>(
        &'a self,
        scan_root: &'a ScanRoot,
    ) -> Box<dyn Iterator<Item = Result<SourceFile, FileError>> + 'a> {
        let root = &scan_root.root;
        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "source directory does not exist, skipping");
            return Box::new(std::iter::empty());
        }

        let walker = WalkDir::new(root)
            .follow_links(scan_root.follow_symlinks)
            .sort_by_file_name();

        Box::new(walker.into_iter().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                    return Some(Err(FileError::Walk {
                        path,
                        message: e.to_string(),
                    }));
                }
            };
            if !entry.file_type().is_file() {
                return None;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if scan_root.exclude.is_match(relative) || !scan_root.include.is_match(relative) {
                return None;
            }

            Some(Ok(SourceFile {
                path: path.to_path_buf(),
                key: self.key_for(path),
                category: category_of(relative),
            }))
        }))
    }
}

/// `/`-separated path of `path` relative to `base_dir`, with `..` steps for
/// paths outside it. Both sides are normalized first, so
/// `config/../data/a.md` and `data/a.md` yield the same key. Paths that
/// share no root with `base_dir` keep their full form.
fn relative_key(base_dir: &Path, path: &Path) -> String {
    let base = normalize_path(base_dir);
    let target = normalize_path(path);
    let base_parts: Vec<Component> = base.components().collect();
    let target_parts: Vec<Component> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let rooted = base.has_root() || target.has_root();
    let base_rest = &base_parts[common..];
    if (common == 0 && rooted) || base_rest.iter().any(|c| *c == Component::ParentDir) {
        return target.to_string_lossy().replace('\\', "/");
    }

    base_rest
        .iter()
        .map(|_| "..".to_string())
        .chain(target_parts[common..].iter().map(|c| c.as_os_str().to_string_lossy().to_string()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically drop `.` and resolve `..` against the preceding component.
/// A `..` that climbs above a relative path is kept; one above the root is
/// dropped.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical form of an existing directory, lexical normal form otherwise.
fn resolve_dir(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize_path(path))
}

/// First directory under the watched root, or `"root"` for top-level files.
fn category_of(relative: &Path) -> String {
    let mut parts = relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    });
    match (parts.next(), parts.next()) {
        (Some(first), Some(_)) => first.to_string_lossy().to_string(),
        _ => "root".to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
