//! Durable output for QA generation runs.
//!
//! A [`ResultSink`] receives three kinds of writes: periodic checkpoints
//! during the run, and the final results plus failure log at the end.
//! [`JsonFileSink`] writes JSON files next to the configured output path;
//! [`MemorySink`] keeps everything in memory for tests and embedding.

pub mod json;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::pipeline::{CheckpointRecord, FailedJob, QaPair};

pub use json::{checkpoint_path, failures_path, JsonFileSink};

/// Result Sink interface consumed by the pipeline.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist a checkpoint without overwriting any earlier one.
    ///
    /// Returns a human-readable location of the written artifact.
    async fn write_checkpoint(&self, record: &CheckpointRecord) -> Result<String, SinkError>;

    /// Persist the final successful results.
    async fn write_results(&self, pairs: &[QaPair]) -> Result<(), SinkError>;

    /// Persist the failure log.
    async fn write_failures(&self, failures: &[FailedJob]) -> Result<(), SinkError>;
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    checkpoints: Mutex<Vec<CheckpointRecord>>,
    results: Mutex<Vec<QaPair>>,
    failures: Mutex<Vec<FailedJob>>,
    reject_checkpoints: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose checkpoint writes always fail.
    pub fn rejecting_checkpoints() -> Self {
        Self {
            reject_checkpoints: true,
            ..Self::default()
        }
    }

    pub fn checkpoints(&self) -> Vec<CheckpointRecord> {
        self.checkpoints.lock().expect("sink lock poisoned").clone()
    }

    pub fn results(&self) -> Vec<QaPair> {
        self.results.lock().expect("sink lock poisoned").clone()
    }

    pub fn failures(&self) -> Vec<FailedJob> {
        self.failures.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn write_checkpoint(&self, record: &CheckpointRecord) -> Result<String, SinkError> {
        if self.reject_checkpoints {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "checkpoint storage is read-only",
            )));
        }
        let mut checkpoints = self.checkpoints.lock().expect("sink lock poisoned");
        checkpoints.push(record.clone());
        Ok(format!("memory://checkpoint/{}", record.sequence))
    }

    async fn write_results(&self, pairs: &[QaPair]) -> Result<(), SinkError> {
        *self.results.lock().expect("sink lock poisoned") = pairs.to_vec();
        Ok(())
    }

    async fn write_failures(&self, failures: &[FailedJob]) -> Result<(), SinkError> {
        *self.failures.lock().expect("sink lock poisoned") = failures.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(sequence: u64) -> CheckpointRecord {
        CheckpointRecord {
            run_id: Uuid::new_v4(),
            sequence,
            completed_jobs: 0,
            created_at: Utc::now(),
            results: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_checkpoints() {
        let sink = MemorySink::new();
        let first = sink.write_checkpoint(&record(1)).await.expect("write");
        sink.write_checkpoint(&record(2)).await.expect("write");

        assert_eq!(first, "memory://checkpoint/1");
        let stored = sink.checkpoints();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].sequence, 2);
    }

    #[tokio::test]
    async fn test_rejecting_sink() {
        let sink = MemorySink::rejecting_checkpoints();
        assert!(sink.write_checkpoint(&record(1)).await.is_err());
        assert!(sink.write_results(&[]).await.is_ok());
    }
}
