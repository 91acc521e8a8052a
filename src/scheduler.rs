//! Run scheduling: one-shot runs and the long-lived interval loop.
//!
//! The interval loop runs a cycle, then sleeps in `poll_interval_secs`
//! steps until `interval_minutes` have passed, checking a shared stop flag
//! between steps. A cycle that fails or exceeds `cycle_timeout_secs` is
//! logged and followed by `retry_backoff_secs` of (cancellable) backoff;
//! the loop itself only ends when the flag is set.

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Config, SchedulerConfig};
use crate::ingest::{run_from_config, RunOptions};
use crate::models::RunStats;

#[derive(Debug, Clone, Copy)]
pub struct IntervalSettings {
    pub interval: Duration,
    pub poll: Duration,
    pub backoff: Duration,
    pub cycle_timeout: Duration,
}

impl IntervalSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_minutes * 60),
            poll: Duration::from_secs(config.poll_interval_secs),
            backoff: Duration::from_secs(config.retry_backoff_secs),
            cycle_timeout: Duration::from_secs(config.cycle_timeout_secs),
        }
    }
}

/// Perform a single run and log its summary.
pub async fn run_once(config: &Config, options: RunOptions) -> Result<RunStats> {
    let stats = run_from_config(config, options).await?;
    if stats.errors > 0 {
        tracing::warn!(errors = stats.errors, "run finished with errors");
    }
    Ok(stats)
}

/// Run the interval loop against `config` until SIGINT/SIGTERM.
pub async fn start_interval(config: &Config) -> Result<()> {
    let settings = IntervalSettings::from_config(&config.scheduler);
    let stop = Arc::new(AtomicBool::new(false));
    let listener = spawn_signal_listener(Arc::clone(&stop));

    tracing::info!(
        interval_minutes = config.scheduler.interval_minutes,
        "starting interval scheduler"
    );

    let cycles = interval_loop(settings, Arc::clone(&stop), || {
        let config = config.clone();
        async move { run_once(&config, RunOptions::default()).await }
    })
    .await;

    listener.abort();
    tracing::info!(cycles, "interval scheduler stopped");
    Ok(())
}

/// Drive `cycle` until `stop` is set. Returns the number of cycles started.
///
/// A cycle already in flight when the flag is set runs to completion (or
/// to its timeout); no new cycle starts afterwards.
pub async fn interval_loop<F, Fut>(
    settings: IntervalSettings,
    stop: Arc<AtomicBool>,
    mut cycle: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunStats>>,
{
    let mut cycles = 0;

    while !stop.load(Ordering::SeqCst) {
        cycles += 1;
        let pause = match tokio::time::timeout(settings.cycle_timeout, cycle()).await {
            Ok(Ok(stats)) => {
                tracing::info!(
                    cycle = cycles,
                    fragments = stats.fragments_added,
                    errors = stats.errors,
                    "cycle complete"
                );
                settings.interval
            }
            Ok(Err(e)) => {
                tracing::error!(cycle = cycles, error = %format!("{:#}", e), "cycle failed");
                settings.backoff
            }
            Err(_) => {
                tracing::error!(
                    cycle = cycles,
                    timeout = ?settings.cycle_timeout,
                    "cycle timed out"
                );
                settings.backoff
            }
        };

        if !sleep_unless_stopped(pause, settings.poll, &stop).await {
            break;
        }
    }

    cycles
}

/// Sleep for `total` in `poll`-sized steps. Returns `false` as soon as
/// `stop` is observed.
async fn sleep_unless_stopped(total: Duration, poll: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// Set `stop` on the first SIGINT (or SIGTERM on Unix).
pub fn spawn_signal_listener(stop: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("stop requested, finishing current cycle");
        stop.store(true, Ordering::SeqCst);
    })
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM, using Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
