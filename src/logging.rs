//! Logging setup.
//!
//! Components log through `tracing` macros and never own a logger. The
//! binary installs one subscriber with two layers: human-readable output on
//! stderr and plain text in a size-rotating log file
//! (`auto_update.log`, `auto_update.log.1`, … `auto_update.log.N`).
//!
//! `RUST_LOG` overrides `logging.level` when set.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. `log_file` is the resolved path of
/// `logging.file`.
pub fn init_logging(config: &LoggingConfig, log_file: &Path) -> Result<()> {
    let writer = RotatingFileWriter::open(
        log_file,
        config.max_file_size_mb * 1024 * 1024,
        config.backup_count,
    )
    .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid logging.level: '{}'", config.level))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

/// Appending file writer that rolls over once the file would exceed
/// `max_bytes`, keeping at most `backups` numbered predecessors.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingState>>,
}

struct RotatingState {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingState {
                path,
                max_bytes,
                backups,
                file,
                written,
            })),
        })
    }
}

impl RotatingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = File::create(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        for i in (1..self.backups).rev() {
            let from = backup_path(&self.path, i);
            if from.exists() {
                std::fs::rename(&from, backup_path(&self.path, i + 1))?;
            }
        }
        std::fs::rename(&self.path, backup_path(&self.path, 1))?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        if state.written > 0 && state.written + buf.len() as u64 > state.max_bytes {
            state.rotate()?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        state.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scoped log capture for unit tests.

    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::DefaultGuard;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Events emitted on this thread while the value is alive.
    pub struct CapturedLogs {
        buf: SharedBuf,
        _guard: DefaultGuard,
    }

    impl CapturedLogs {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.buf.0.lock().unwrap()).to_string()
        }
    }

    pub fn capture_logs() -> CapturedLogs {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        CapturedLogs {
            buf,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotates_when_full() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("run.log");
        let mut writer = RotatingFileWriter::open(&path, 32, 2).unwrap();

        for i in 0..10 {
            writer
                .write_all(format!("line number {:02}\n", i).as_bytes())
                .unwrap();
        }
        writer.flush().unwrap();

        assert!(path.exists());
        assert!(backup_path(&path, 1).exists());
        assert!(backup_path(&path, 2).exists());
        assert!(!backup_path(&path, 3).exists());
        assert!(std::fs::metadata(&path).unwrap().len() <= 32);

        let current = std::fs::read_to_string(&path).unwrap();
        assert!(current.contains("line number 09"));
    }

    #[test]
    fn test_zero_backups_truncates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.log");
        let mut writer = RotatingFileWriter::open(&path, 16, 0).unwrap();
        writer.write_all(b"0123456789\n").unwrap();
        writer.write_all(b"abcdefghij\n").unwrap();
        assert!(!backup_path(&path, 1).exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abcdefghij\n");
    }

    #[test]
    fn test_capture_sees_scoped_events() {
        let logs = testing::capture_logs();
        tracing::warn!(path = "a.txt", "something odd");
        let out = logs.contents();
        assert!(out.contains("WARN"));
        assert!(out.contains("something odd"));
        assert!(out.contains("a.txt"));
    }
}
