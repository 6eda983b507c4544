//! Background progress monitor for long QA generation runs.
//!
//! Periodically logs completed/expected jobs, throughput and ETA so operators
//! can follow a run without parsing per-job log lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::stats::{ProgressSnapshot, StatsAggregator};

/// A background task that periodically logs pipeline progress.
///
/// Call [`ProgressMonitor::stop`] to end it; dropping it also signals the
/// task to exit at its next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a monitor that logs `stats` every `interval`.
    pub fn start(stats: Arc<StatsAggregator>, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                log_progress(&stats.progress());
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the background monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

fn log_progress(snap: &ProgressSnapshot) {
    let eta_mins = snap
        .eta
        .map(|eta| format!("{:.1}", eta.as_secs_f64() / 60.0))
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        completed = snap.completed,
        expected = snap.expected,
        success = snap.success,
        failed = snap.failed,
        progress_pct = format!("{:.1}%", snap.percent()),
        elapsed_secs = snap.elapsed.as_secs(),
        jobs_per_sec = format!("{:.2}", snap.throughput),
        avg_secs_per_job = format!("{:.2}", snap.avg_secs_per_job),
        eta_mins = %eta_mins,
        "QA generation progress"
    );
}
