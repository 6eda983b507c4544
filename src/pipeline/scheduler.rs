//! Batch scheduler: drives jobs through the stage in sequential batches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::admission::AdmissionController;
use super::cache::CacheStats;
use super::checkpoint::{CheckpointReceipt, CheckpointWriter};
use super::config::PipelineConfig;
use super::job::{Job, JobResult};
use super::progress::ProgressMonitor;
use super::runner::PipelineError;
use super::stage::JobStage;
use super::stats::{RunStats, StatsAggregator};
use crate::sink::ResultSink;

/// Observable milestones of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted { run_id: Uuid, total_jobs: usize, batches: usize },
    BatchStarted { index: usize, size: usize },
    BatchCompleted { index: usize, size: usize, failed: usize, completed: usize },
    CheckpointWritten { sequence: u64, completed: usize, location: String },
    HighFailureRate { index: usize, failed: usize, size: usize, ratio: f64 },
    RunCompleted { stats: RunStats },
    RunCancelled { completed: usize },
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Results in completion order, batch by batch.
    pub results: Vec<JobResult>,
    pub stats: RunStats,
    pub batches: usize,
    pub checkpoints: u64,
    pub cache: CacheStats,
    pub peak_in_flight: usize,
}

/// Sequences batches and fans each one out under the admission gate.
pub struct BatchScheduler {
    stage: JobStage,
    admission: AdmissionController,
    sink: Arc<dyn ResultSink>,
    config: PipelineConfig,
    event_tx: Option<Sender<PipelineEvent>>,
}

impl BatchScheduler {
    pub fn new(stage: JobStage, sink: Arc<dyn ResultSink>, config: PipelineConfig) -> Self {
        let admission = AdmissionController::new(config.concurrency_limit);
        Self {
            stage,
            admission,
            sink,
            config,
            event_tx: None,
        }
    }

    /// Sends [`PipelineEvent`]s to `tx` during runs.
    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Processes `jobs` in consecutive batches of `config.batch_size`.
    ///
    /// Jobs within a batch run concurrently, bounded by the admission gate;
    /// the next batch starts only after the whole previous batch finished.
    /// Job failures are recorded in the results. On cancellation the
    /// in-flight batch is abandoned, a checkpoint of the completed batches
    /// is written, and `PipelineError::Cancelled` is returned.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let total = jobs.len();
        let batch_size = self.config.batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        let every = self.config.checkpoint_every_batches.max(1);

        tracing::info!(
            run_id = %run_id,
            total_jobs = total,
            batches = batches,
            batch_size = batch_size,
            concurrency = self.admission.limit(),
            "Starting QA generation run"
        );
        emit(
            &self.event_tx,
            PipelineEvent::RunStarted {
                run_id,
                total_jobs: total,
                batches,
            },
        )
        .await;

        let stats = Arc::new(StatsAggregator::new(total));
        let monitor = ProgressMonitor::start(stats.clone(), self.config.progress_interval);
        let mut writer = CheckpointWriter::new(self.sink.clone(), run_id);
        let mut buffer: Vec<JobResult> = Vec::with_capacity(total);

        for (index, batch) in jobs.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                monitor.stop().await;
                return Err(self.abort(&mut writer, &buffer).await);
            }

            emit(
                &self.event_tx,
                PipelineEvent::BatchStarted {
                    index,
                    size: batch.len(),
                },
            )
            .await;

            let fan_out = futures::future::join_all(batch.iter().cloned().map(|job| self.admit(job)));
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    monitor.stop().await;
                    return Err(self.abort(&mut writer, &buffer).await);
                }
                outcomes = fan_out => outcomes,
            };

            let mut failed = 0;
            for outcome in outcomes {
                let result = outcome?;
                stats.record(&result);
                if !result.is_success() {
                    failed += 1;
                }
                buffer.push(result);
            }

            tracing::info!(
                batch = index + 1,
                of = batches,
                size = batch.len(),
                failed = failed,
                completed = buffer.len(),
                "Batch completed"
            );
            emit(
                &self.event_tx,
                PipelineEvent::BatchCompleted {
                    index,
                    size: batch.len(),
                    failed,
                    completed: buffer.len(),
                },
            )
            .await;

            let ratio = failed as f64 / batch.len() as f64;
            if ratio > self.config.failure_warn_ratio {
                tracing::warn!(
                    batch = index + 1,
                    failed = failed,
                    size = batch.len(),
                    ratio = format!("{:.1}%", ratio * 100.0),
                    "High failure rate in batch"
                );
                emit(
                    &self.event_tx,
                    PipelineEvent::HighFailureRate {
                        index,
                        failed,
                        size: batch.len(),
                        ratio,
                    },
                )
                .await;
            }

            if (index + 1) % every == 0 {
                let previous = writer.submit(buffer.clone()).await?;
                self.report_checkpoint(previous).await;
            }
        }

        let last = writer.flush().await?;
        self.report_checkpoint(last).await;
        monitor.stop().await;

        let snapshot = stats.snapshot();
        snapshot.log_summary();
        emit(
            &self.event_tx,
            PipelineEvent::RunCompleted {
                stats: snapshot.clone(),
            },
        )
        .await;

        Ok(RunOutcome {
            run_id,
            results: buffer,
            stats: snapshot,
            batches,
            checkpoints: writer.written(),
            cache: self.stage.cache().stats(),
            peak_in_flight: self.admission.peak_in_flight(),
        })
    }

    async fn admit(&self, job: Job) -> Result<JobResult, PipelineError> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| PipelineError::AdmissionClosed)?;
        Ok(self.stage.process(job).await)
    }

    /// Closes the gate and persists what has been completed.
    async fn abort(&self, writer: &mut CheckpointWriter, buffer: &[JobResult]) -> PipelineError {
        self.admission.close();
        tracing::warn!(completed = buffer.len(), "Run cancelled, saving checkpoint");

        let mut checkpoint = None;
        let saved = async {
            let previous = writer.submit(buffer.to_vec()).await?;
            let last = writer.flush().await?;
            Ok::<_, crate::error::SinkError>((previous, last))
        }
        .await;

        match saved {
            Ok((previous, last)) => {
                self.report_checkpoint(previous).await;
                checkpoint = last.as_ref().map(|r| r.location.clone());
                self.report_checkpoint(last).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to save checkpoint after cancellation");
            }
        }

        emit(
            &self.event_tx,
            PipelineEvent::RunCancelled {
                completed: buffer.len(),
            },
        )
        .await;

        PipelineError::Cancelled {
            completed: buffer.len(),
            checkpoint,
        }
    }

    async fn report_checkpoint(&self, receipt: Option<CheckpointReceipt>) {
        if let Some(r) = receipt {
            emit(
                &self.event_tx,
                PipelineEvent::CheckpointWritten {
                    sequence: r.sequence,
                    completed: r.completed_jobs,
                    location: r.location,
                },
            )
            .await;
        }
    }
}

async fn emit(tx: &Option<mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(sender) = tx {
        let _ = sender.send(event).await;
    }
}
