//! Throughput and latency reporting for a benchmark run.
//!
//! A client process marks the moment it starts and stops injecting
//! requests, and every committed block bumps a running transaction
//! counter; `Reporter::print` summarizes both at the end of a run.

use std::time::{Duration, Instant};

use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks the wall-clock span of a benchmark run and the number of
/// transactions that were actually committed during it.
pub struct Reporter {
    start: Option<Instant>,
    end: Option<Instant>,
    committed_tx_num: AtomicI64,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter {
            start: None,
            end: None,
            committed_tx_num: AtomicI64::new(0),
        }
    }

    pub fn set_start_time(&mut self) {
        self.start = Some(Instant::now());
    }

    pub fn set_end_time(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn add_committed_transactions(&self, n: i64) {
        self.committed_tx_num.fetch_add(n, Ordering::Relaxed);
    }

    fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Transactions committed per second over the run's duration.
    pub fn tps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.committed_tx_num.load(Ordering::Relaxed) as f64 / secs
    }

    pub fn committed_transactions(&self) -> i64 {
        self.committed_tx_num.load(Ordering::Relaxed)
    }

    /// Logs a summary of the run at info level.
    pub fn print(&self) {
        log::info!("Result:");
        log::info!("TPS: {:.3}", self.tps());
        log::info!("Latency: {:.3}s", self.elapsed().as_secs_f64());
        log::info!("Committed Transaction Num: {}", self.committed_transactions());
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
