//! Periodic snapshots of the result buffer.
//!
//! The scheduler hands [`CheckpointWriter::submit`] an owned copy of the
//! buffer; the write then runs on its own task so it overlaps the next
//! batch. At most one write is outstanding: submitting a new snapshot or
//! calling [`CheckpointWriter::flush`] first waits for the previous one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job::JobResult;
use crate::error::SinkError;
use crate::sink::ResultSink;

/// On-disk checkpoint envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run_id: Uuid,
    /// 1-based position of this checkpoint within its run.
    pub sequence: u64,
    /// Jobs covered by `results`.
    pub completed_jobs: usize,
    pub created_at: DateTime<Utc>,
    pub results: Vec<JobResult>,
}

/// Acknowledgement of a finished checkpoint write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReceipt {
    pub sequence: u64,
    pub completed_jobs: usize,
    pub location: String,
}

/// Writes checkpoints for one run through a [`ResultSink`].
pub struct CheckpointWriter {
    sink: Arc<dyn ResultSink>,
    run_id: Uuid,
    sequence: u64,
    pending: Option<JoinHandle<Result<CheckpointReceipt, SinkError>>>,
}

impl CheckpointWriter {
    pub fn new(sink: Arc<dyn ResultSink>, run_id: Uuid) -> Self {
        Self {
            sink,
            run_id,
            sequence: 0,
            pending: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Checkpoints started so far.
    pub fn written(&self) -> u64 {
        self.sequence
    }

    /// Starts writing `results` in the background.
    ///
    /// Returns the receipt of the previous write if one was still pending.
    ///
    /// # Errors
    ///
    /// Fails if the previous write failed or its task panicked.
    pub async fn submit(
        &mut self,
        results: Vec<JobResult>,
    ) -> Result<Option<CheckpointReceipt>, SinkError> {
        let previous = self.flush().await?;

        self.sequence += 1;
        let record = CheckpointRecord {
            run_id: self.run_id,
            sequence: self.sequence,
            completed_jobs: results.len(),
            created_at: Utc::now(),
            results,
        };

        let sink = self.sink.clone();
        self.pending = Some(tokio::spawn(async move {
            let location = sink.write_checkpoint(&record).await?;
            tracing::info!(
                sequence = record.sequence,
                completed = record.completed_jobs,
                location = %location,
                "Checkpoint saved"
            );
            Ok(CheckpointReceipt {
                sequence: record.sequence,
                completed_jobs: record.completed_jobs,
                location,
            })
        }));

        Ok(previous)
    }

    /// Waits for the outstanding write, if any.
    pub async fn flush(&mut self) -> Result<Option<CheckpointReceipt>, SinkError> {
        match self.pending.take() {
            Some(handle) => {
                let receipt = handle
                    .await
                    .map_err(|e| SinkError::TaskFailed(e.to_string()))??;
                Ok(Some(receipt))
            }
            None => Ok(None),
        }
    }
}

/// Rebuilds a result set from checkpoint files.
///
/// Records are ordered by run, then sequence; each job id is kept once, at
/// its first occurrence. Because every checkpoint holds the whole buffer at
/// the time it was taken, the output is the prefix of the final results
/// covered by the newest checkpoint.
pub async fn merge_checkpoints<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<JobResult>, SinkError> {
    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let record: CheckpointRecord = serde_json::from_slice(&raw)?;
        records.push(record);
    }
    Ok(merge_records(records))
}

/// Merges in-memory checkpoint records; see [`merge_checkpoints`].
pub fn merge_records(mut records: Vec<CheckpointRecord>) -> Vec<JobResult> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.sequence.cmp(&b.sequence))
    });
    // keep runs together, ordered by their first checkpoint
    let mut run_order: Vec<Uuid> = Vec::new();
    for r in &records {
        if !run_order.contains(&r.run_id) {
            run_order.push(r.run_id);
        }
    }
    records.sort_by_key(|r| {
        (
            run_order.iter().position(|id| *id == r.run_id).unwrap_or(usize::MAX),
            r.sequence,
        )
    });

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for record in records {
        for result in record.results {
            if seen.insert(result.job.id.clone()) {
                merged.push(result);
            }
        }
    }
    merged
}
