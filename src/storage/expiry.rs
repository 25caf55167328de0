//! Active Expiry
//!
//! Passive expiry only reclaims a key when something reads it. Keys that
//! expire and are never touched again would hold memory forever, so a
//! background task sweeps the keyspace on a timer.
//!
//! The timer adapts to what the sweeps find:
//!
//! - more than `speedup_threshold` of the scanned volatile keys were expired:
//!   halve the interval (down to `min_interval`)
//! - nothing expired: double it (up to `max_interval`)
//!
//! Removed keys are deducted from memory usage and counted as expired, exactly
//! like passive expiry.

use crate::storage::entry::now_ms;
use crate::storage::{StorageEngine, SweepStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Default sweep frequency in Hz.
pub const DEFAULT_HZ: u32 = 10;

/// Timing for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval to start from
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Expired fraction of scanned keys above which sweeps speed up
    pub speedup_threshold: f64,
}

impl ExpiryConfig {
    /// Timing for a sweep frequency of `hz` (clamped to 1..=500).
    pub fn from_hz(hz: u32) -> Self {
        let hz = hz.clamp(1, 500);
        let base_interval = Duration::from_millis(1000 / hz as u64);
        Self {
            base_interval,
            min_interval: (base_interval / 10).max(Duration::from_millis(1)),
            max_interval: (base_interval * 10).min(Duration::from_secs(10)),
            speedup_threshold: 0.25,
        }
    }

    fn next_interval(&self, current: Duration, stats: &SweepStats) -> Duration {
        if stats.scanned == 0 || stats.expired == 0 {
            return (current * 2).min(self.max_interval);
        }
        let rate = stats.expired as f64 / stats.scanned as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else {
            current
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self::from_hz(DEFAULT_HZ)
    }
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.base_interval.as_millis() as u64,
            "Expiry sweeper started"
        );
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            debug!("Expiry sweeper stopping");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        // Nothing can expire without a volatile key
        if engine.volatile_len() == 0 {
            interval = (interval * 2).min(config.max_interval);
            continue;
        }

        let stats = engine.cleanup_expired(now_ms());
        interval = config.next_interval(interval, &stats);

        if stats.expired > 0 {
            debug!(
                scanned = stats.scanned,
                expired = stats.expired,
                used_memory = engine.memory_used(),
                next_ms = interval.as_millis() as u64,
                "Expired keys removed"
            );
        } else {
            trace!(
                scanned = stats.scanned,
                next_ms = interval.as_millis() as u64,
                "Expiry sweep found nothing"
            );
        }
    }
}
