//! Typed failures that the pipeline classifies instead of propagating.
//!
//! Everything fatal travels as `anyhow::Error`. The enums here cover the
//! cases that are counted and survived: one unreadable file, one failed
//! `crontab` invocation.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A failure confined to a single source file. The run continues and the
/// file's cache entry is left untouched so it is retried next run.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

/// A failure of the periodic-job adapter while talking to the host.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("periodic jobs are only supported on Unix hosts")]
    Unsupported,
    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
