//! Background Stats Monitor
//!
//! A Tokio task that wakes up on a fixed interval and logs the server's
//! connection and transfer counters.
//!
//! ```text
//! loop {
//!     sleep(interval) or shutdown
//!     log active connections, total bytes, throughput since last tick
//! }
//! ```
//!
//! The monitor stops when its handle is dropped or when [`StatsMonitor::stop`]
//! is called.

use crate::state::Stats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default interval between reports.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// A handle to the running stats monitor.
///
/// When this handle is dropped, the monitor task will be stopped.
#[derive(Debug)]
pub struct StatsMonitor {
    shutdown_tx: watch::Sender<bool>,
}

impl StatsMonitor {
    /// Starts the monitor as a background task.
    pub fn start(stats: Arc<Stats>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(monitor_loop(stats, interval, shutdown_rx));

        debug!(interval_ms = interval.as_millis(), "Stats monitor started");

        Self { shutdown_tx }
    }

    /// Stops the monitor.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for StatsMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn monitor_loop(stats: Arc<Stats>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut last_transferred = stats.transferred();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Stats monitor received shutdown signal");
                    return;
                }
            }
        }

        let snapshot = stats.snapshot();
        let delta = snapshot.bytes_transferred.saturating_sub(last_transferred);
        last_transferred = snapshot.bytes_transferred;

        info!(
            active_connections = snapshot.active_connections,
            connections_accepted = snapshot.connections_accepted,
            bytes_transferred = snapshot.bytes_transferred,
            bytes_per_sec = %format!("{:.0}", delta as f64 / interval.as_secs_f64()),
            "Server stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_runs_and_stops() {
        let stats = Arc::new(Stats::new());
        let monitor = StatsMonitor::start(Arc::clone(&stats), Duration::from_millis(10));

        stats.bytes_transferred(100);
        tokio::time::sleep(Duration::from_millis(35)).await;

        monitor.stop();

        // Task exits after the signal; the receiver goes away with it
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(monitor.shutdown_tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_drop() {
        let stats = Arc::new(Stats::new());
        let probe = {
            let monitor = StatsMonitor::start(Arc::clone(&stats), Duration::from_millis(10));
            let probe = monitor.shutdown_tx.subscribe();
            assert_eq!(monitor.shutdown_tx.receiver_count(), 2);
            probe
        };

        assert!(*probe.borrow());
    }
}
