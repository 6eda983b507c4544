//! Run statistics.
//!
//! All counters live behind one mutex so a snapshot is always consistent:
//! `success + failed == total` holds for every [`RunStats`] handed out.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::job::{JobResult, JobStatus};

/// Success/failure counts for one country or topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub success: u64,
    pub failed: u64,
}

impl CategoryCounts {
    pub fn total(&self) -> u64 {
        self.success + self.failed
    }

    /// Success rate as a value between 0.0 and 1.0, or 0.0 if empty.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.success as f64 / total as f64
        }
    }
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Jobs processed so far.
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Successful jobs served from the run cache.
    pub cache_hits: u64,
    pub by_country: BTreeMap<String, CategoryCounts>,
    pub by_topic: BTreeMap<String, CategoryCounts>,
    pub elapsed_secs: f64,
}

impl RunStats {
    /// Success rate as a value between 0.0 and 1.0, or 0.0 if nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }

    /// Average wall-clock seconds per processed job.
    pub fn avg_secs_per_job(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.elapsed_secs / self.total as f64
        }
    }

    /// Logs the end-of-run summary with per-country and per-topic rates.
    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total,
            success = self.success,
            failed = self.failed,
            cache_hits = self.cache_hits,
            success_rate = format!("{:.1}%", self.success_rate() * 100.0),
            elapsed_secs = format!("{:.1}", self.elapsed_secs),
            avg_secs_per_job = format!("{:.2}", self.avg_secs_per_job()),
            "QA generation finished"
        );
        for (country, counts) in &self.by_country {
            tracing::info!(
                country = %country,
                success = counts.success,
                total = counts.total(),
                success_rate = format!("{:.1}%", counts.success_rate() * 100.0),
                "Success rate by country"
            );
        }
        for (topic, counts) in &self.by_topic {
            tracing::info!(
                topic = %topic,
                success = counts.success,
                total = counts.total(),
                success_rate = format!("{:.1}%", counts.success_rate() * 100.0),
                "Success rate by topic"
            );
        }
    }
}

/// Progress view derived from a [`RunStats`] snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    /// Jobs scheduled for the run.
    pub expected: u64,
    pub success: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Completed jobs per second.
    pub throughput: f64,
    pub avg_secs_per_job: f64,
    /// Estimated time to finish; `None` until the first job completes.
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.expected == 0 {
            0.0
        } else {
            (self.completed as f64 / self.expected as f64 * 100.0).min(100.0)
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    success: u64,
    failed: u64,
    cache_hits: u64,
    by_country: BTreeMap<String, CategoryCounts>,
    by_topic: BTreeMap<String, CategoryCounts>,
}

/// Serialized recorder of job outcomes.
#[derive(Debug)]
pub struct StatsAggregator {
    counters: Mutex<Counters>,
    started: Instant,
    expected: u64,
}

impl StatsAggregator {
    /// Creates an aggregator for a run of `expected` jobs, starting the clock.
    pub fn new(expected: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
            expected: expected as u64,
        }
    }

    /// Records one result. Country and topic are counted as given on the job.
    pub fn record(&self, result: &JobResult) {
        let mut c = self.counters.lock().expect("stats lock poisoned");
        c.total += 1;

        let success = result.status == JobStatus::Success;
        if success {
            c.success += 1;
            if result.cached {
                c.cache_hits += 1;
            }
        } else {
            c.failed += 1;
        }

        let country = c.by_country.entry(result.job.country.clone()).or_default();
        bump(country, success);
        let topic = c.by_topic.entry(result.job.topic.clone()).or_default();
        bump(topic, success);
    }

    pub fn snapshot(&self) -> RunStats {
        let c = self.counters.lock().expect("stats lock poisoned");
        RunStats {
            total: c.total,
            success: c.success,
            failed: c.failed,
            cache_hits: c.cache_hits,
            by_country: c.by_country.clone(),
            by_topic: c.by_topic.clone(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let (completed, success, failed) = {
            let c = self.counters.lock().expect("stats lock poisoned");
            (c.total, c.success, c.failed)
        };
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();

        let throughput = if secs > 0.0 {
            completed as f64 / secs
        } else {
            0.0
        };
        let avg_secs_per_job = if completed > 0 {
            secs / completed as f64
        } else {
            0.0
        };
        let eta = (completed > 0).then(|| {
            let remaining = self.expected.saturating_sub(completed);
            Duration::from_secs_f64(avg_secs_per_job * remaining as f64)
        });

        ProgressSnapshot {
            completed,
            expected: self.expected,
            success,
            failed,
            elapsed,
            throughput,
            avg_secs_per_job,
            eta,
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }
}

fn bump(counts: &mut CategoryCounts, success: bool) {
    if success {
        counts.success += 1;
    } else {
        counts.failed += 1;
    }
}
