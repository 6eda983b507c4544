//! Concurrent QA-pair generation pipeline.
//!
//! Turns a collection of generated questions into question/answer/context
//! triples by calling a retrieval service and an answer generator for each
//! question, under a fixed concurrency limit.
//!
//! # Architecture
//!
//! - **Scheduler**: splits jobs into sequential batches and fans each batch out
//! - **Admission**: semaphore gate bounding jobs in flight across the run
//! - **Stage**: per-job cache lookup, retrieval and generation
//! - **Cache**: run-scoped, single-flight memoization keyed by question signature
//! - **Checkpoint**: background snapshots of the result buffer
//! - **Stats / Progress**: counters, periodic progress logs and the final summary
//! - **Config**: run settings from defaults, environment or YAML
//!
//! # Pipeline Flow
//!
//! 1. Questions are loaded from a [`crate::source::QuestionSource`], optionally sampled
//! 2. Each batch is fanned out; every job waits for an admission permit
//! 3. A job is served from the cache or resolved through retrieval then generation
//! 4. Results are recorded in the stats and appended to the result buffer
//! 5. Every few batches a copy of the buffer is checkpointed
//! 6. Final results and the failure log go to the [`crate::sink::ResultSink`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qa_forge::pipeline::{run_pipeline, PipelineConfig};
//! use qa_forge::sink::JsonFileSink;
//! use qa_forge::source::JsonQuestionFile;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = PipelineConfig::new()
//!     .with_concurrency_limit(8)
//!     .with_batch_size(50)
//!     .with_output_path("qa_pairs.json");
//!
//! let stats = run_pipeline(
//!     &JsonQuestionFile::new("questions.json"),
//!     Arc::new(JsonFileSink::new(&config.output_path)),
//!     retriever,
//!     generator,
//!     &config,
//!     CancellationToken::new(),
//! )
//! .await?;
//!
//! println!("{}/{} succeeded", stats.success, stats.total);
//! ```

pub mod admission;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod job;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod stage;
pub mod stats;

// Re-export main types for convenience
pub use admission::{AdmissionController, AdmissionPermit};
pub use cache::{AnswerCache, CacheEntry, CacheStats, Signature};
pub use checkpoint::{merge_checkpoints, CheckpointReceipt, CheckpointRecord, CheckpointWriter};
pub use config::{ConfigError, PipelineConfig};
pub use job::{truncate_chars, FailedJob, Job, JobResult, JobStatus, QaPair};
pub use progress::ProgressMonitor;
pub use runner::{
    question_distribution, run_pipeline, run_pipeline_with_events, sample_jobs, PipelineError,
};
pub use scheduler::{BatchScheduler, PipelineEvent, RunOutcome};
pub use stage::{JobStage, StageError};
pub use stats::{CategoryCounts, ProgressSnapshot, RunStats, StatsAggregator};
