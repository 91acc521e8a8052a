//! Periodic-job registration with the host's `crontab`.
//!
//! The adapter only edits the user's crontab; the host's cron daemon is
//! what later invokes `ragsync run-once`. Our line is preceded by a marker
//! comment so it can be found again:
//!
//! ```text
//! # ragsync: auto-update RAG index
//! 0 6 * * * cd /srv/kb && /usr/local/bin/ragsync --config /srv/kb/ragsync.toml run-once >> /srv/kb/logs/cron.log 2>&1
//! ```
//!
//! Every `crontab` invocation runs under a hard timeout; expiry is an error,
//! never a hang.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::error::JobError;

pub const MARKER: &str = "# ragsync: auto-update RAG index";

/// Registration with an OS-level periodic-job facility.
#[async_trait]
pub trait PeriodicJobAdapter: Send + Sync {
    /// The command line the facility would run.
    fn generate_entry(&self) -> String;

    /// Register the entry. `Ok(false)` means it was already registered.
    async fn install(&self) -> Result<bool, JobError>;

    /// Unregister the entry. `Ok(false)` means there was nothing to remove.
    async fn remove(&self) -> Result<bool, JobError>;
}

pub struct CrontabAdapter {
    entry: String,
    timeout: Duration,
    /// Program and leading arguments used in place of `crontab`.
    command: Vec<String>,
}

impl CrontabAdapter {
    pub fn new(entry: String, timeout: Duration) -> Self {
        Self {
            entry,
            timeout,
            command: vec!["crontab".to_string()],
        }
    }

    /// Adapter for the running binary and the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let base_dir = absolute(&config.base_dir);
        let config_path = absolute(&config.config_path);
        let log_dir = config
            .resolve(&config.logging.file)
            .parent()
            .map(absolute)
            .unwrap_or_else(|| base_dir.join("logs"));

        let entry = build_entry(
            &config.scheduler.cron_expression,
            &base_dir,
            &exe,
            &config_path,
            &log_dir,
        );
        Ok(Self::new(
            entry,
            Duration::from_secs(config.scheduler.command_timeout_secs),
        ))
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    async fn read_crontab(&self) -> Result<String, JobError> {
        let output = self.run(&["-l"], None).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            // `crontab -l` fails when the user has no crontab yet.
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "no existing crontab"
            );
            Ok(String::new())
        }
    }

    async fn write_crontab(&self, content: &str) -> Result<(), JobError> {
        let output = self.run(&["-"], Some(content)).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(JobError::Failed {
                command: self.describe(&["-"]),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts: Vec<&str> = self.command.iter().map(String::as_str).collect();
        parts.extend_from_slice(args);
        parts.join(" ")
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<Output, JobError> {
        let command = self.describe(args);
        let (program, leading) = match self.command.split_first() {
            Some(split) => split,
            None => {
                return Err(JobError::Spawn {
                    command,
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
                })
            }
        };

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| JobError::Spawn {
            command: command.clone(),
            source,
        })?;

        let input = stdin.map(str::to_string);
        let finished = async move {
            if let (Some(input), Some(mut pipe)) = (input, child.stdin.take()) {
                // A child that exits without reading reports through its status.
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                drop(pipe);
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.timeout, finished).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(JobError::Spawn { command, source }),
            Err(_) => Err(JobError::Timeout {
                command,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl PeriodicJobAdapter for CrontabAdapter {
    fn generate_entry(&self) -> String {
        self.entry.clone()
    }

    async fn install(&self) -> Result<bool, JobError> {
        if !cfg!(unix) {
            return Err(JobError::Unsupported);
        }
        let current = self.read_crontab().await?;
        match add_entry(&current, &self.entry) {
            None => {
                tracing::info!("periodic job already installed");
                Ok(false)
            }
            Some(updated) => {
                self.write_crontab(&updated).await?;
                tracing::info!(entry = %self.entry, "periodic job installed");
                Ok(true)
            }
        }
    }

    async fn remove(&self) -> Result<bool, JobError> {
        if !cfg!(unix) {
            return Err(JobError::Unsupported);
        }
        let current = self.read_crontab().await?;
        match strip_entry(&current, &self.entry) {
            None => {
                tracing::info!("no periodic job to remove");
                Ok(false)
            }
            Some(updated) => {
                self.write_crontab(&updated).await?;
                tracing::info!("periodic job removed");
                Ok(true)
            }
        }
    }
}

/// `{cron} cd {base_dir} && {exe} --config {config} run-once >> {log_dir}/cron.log 2>&1`
pub fn build_entry(
    cron_expression: &str,
    base_dir: &Path,
    exe: &Path,
    config_path: &Path,
    log_dir: &Path,
) -> String {
    format!(
        "{} cd {} && {} --config {} run-once >> {} 2>&1",
        cron_expression.trim(),
        shell_quote(base_dir),
        shell_quote(exe),
        shell_quote(config_path),
        shell_quote(&log_dir.join("cron.log")),
    )
}

/// Append marker and entry. `None` if the marker is already present.
pub fn add_entry(current: &str, entry: &str) -> Option<String> {
    if current.lines().any(|line| line.trim() == MARKER) {
        return None;
    }
    let mut updated = current.trim_end_matches('\n').to_string();
    if !updated.is_empty() {
        updated.push('\n');
    }
    updated.push_str(MARKER);
    updated.push('\n');
    updated.push_str(entry);
    updated.push('\n');
    Some(updated)
}

/// Remove the marker, the line following it and any other copy of
/// `entry`. `None` if neither is present.
pub fn strip_entry(current: &str, entry: &str) -> Option<String> {
    let mut kept = Vec::new();
    let mut removed = false;
    let mut skip_next = false;

    for line in current.lines() {
        if skip_next {
            skip_next = false;
            removed = true;
            continue;
        }
        if line.trim() == MARKER {
            skip_next = true;
            removed = true;
            continue;
        }
        if line.trim() == entry.trim() {
            removed = true;
            continue;
        }
        kept.push(line);
    }

    if !removed {
        return None;
    }
    let mut updated = kept.join("\n");
    if !updated.is_empty() {
        updated.push('\n');
    }
    Some(updated)
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn shell_quote(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "/._-+:@".contains(c)) {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
