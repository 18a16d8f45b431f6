use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track feed throughput (lines received / observations placed)
/// - Track connection churn
/// - Track export health
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Feed
    pub lines_received: AtomicU64,
    pub lines_discarded: AtomicU64,
    pub observations_placed: AtomicU64,
    pub observations_out_of_bounds: AtomicU64,

    // Connection
    pub connect_failures: AtomicU64,
    pub disconnects: AtomicU64,

    // Export
    pub snapshots_written: AtomicU64,
    pub snapshot_errors: AtomicU64,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line summary, used by the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "recv={} discarded={} placed={} out_of_bounds={} connect_fail={} disconnects={} snapshots={} snapshot_err={}",
            self.lines_received.load(Ordering::Relaxed),
            self.lines_discarded.load(Ordering::Relaxed),
            self.observations_placed.load(Ordering::Relaxed),
            self.observations_out_of_bounds.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
            self.disconnects.load(Ordering::Relaxed),
            self.snapshots_written.load(Ordering::Relaxed),
            self.snapshot_errors.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Logs the metrics summary every `every`, forever.
pub async fn report_loop(every: Duration) {
    let mut ticker = report_ticker(every);

    loop {
        ticker.tick().await;
        info!("[METRICS] {}", METRICS.summary());
    }
}

// First tick one period from now; a stalled runtime does not
// produce a burst of catch-up lines.
fn report_ticker(every: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
