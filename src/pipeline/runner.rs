//! Entry point tying source, scheduler and sink together.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use super::cache::AnswerCache;
use super::config::{ConfigError, PipelineConfig};
use super::job::{FailedJob, Job, QaPair};
use super::scheduler::{BatchScheduler, PipelineEvent, RunOutcome};
use super::stage::JobStage;
use super::stats::RunStats;
use crate::error::{SinkError, SourceError};
use crate::llm::AnswerGenerator;
use crate::retrieval::ContextRetriever;
use crate::sink::ResultSink;
use crate::source::QuestionSource;

/// Run-level failures. Job-level errors never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The question source could not be read.
    #[error("Question source error: {0}")]
    Source(#[from] SourceError),

    /// Results or checkpoints could not be written.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// The admission gate was closed while jobs were waiting.
    #[error("Admission gate closed")]
    AdmissionClosed,

    /// The run was cancelled by the operator.
    #[error("Run cancelled after {completed} jobs")]
    Cancelled {
        completed: usize,
        checkpoint: Option<String>,
    },
}

/// Generates QA pairs for every question in `source` and writes the results
/// and failure log to `sink`.
///
/// When `config.max_jobs` is set, a random subset of that size is processed
/// in source order.
pub async fn run_pipeline(
    source: &dyn QuestionSource,
    sink: Arc<dyn ResultSink>,
    retriever: Arc<dyn ContextRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> Result<RunStats, PipelineError> {
    let outcome = run_pipeline_with_events(source, sink, retriever, generator, config, cancel, None)
        .await?;
    Ok(outcome.stats)
}

/// Like [`run_pipeline`], additionally streaming [`PipelineEvent`]s to
/// `event_tx` and returning the full [`RunOutcome`].
pub async fn run_pipeline_with_events(
    source: &dyn QuestionSource,
    sink: Arc<dyn ResultSink>,
    retriever: Arc<dyn ContextRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    config: &PipelineConfig,
    cancel: CancellationToken,
    event_tx: Option<Sender<PipelineEvent>>,
) -> Result<RunOutcome, PipelineError> {
    config.validate()?;

    let records = source.load().await?;
    let loaded = records.len();
    let mut jobs: Vec<Job> = records.into_iter().map(Job::from).collect();
    if let Some(max) = config.max_jobs {
        jobs = sample_jobs(jobs, max, config.sample_seed);
    }
    tracing::info!(
        source = %source.describe(),
        loaded = loaded,
        selected = jobs.len(),
        "Questions loaded"
    );
    for (country, topics) in question_distribution(&jobs) {
        let questions: usize = topics.values().sum();
        let breakdown = topics
            .iter()
            .map(|(topic, n)| format!("{}={}", topic, n))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            country = %country,
            questions = questions,
            topics = %breakdown,
            "Selected questions by country"
        );
    }

    let stage = JobStage::new(
        retriever,
        generator,
        Arc::new(AnswerCache::new()),
        config.context_char_limit,
        config.job_timeout,
    );
    let mut scheduler = BatchScheduler::new(stage, sink.clone(), config.clone());
    if let Some(tx) = event_tx {
        scheduler = scheduler.with_events(tx);
    }

    let outcome = scheduler.run(jobs, &cancel).await?;

    let pairs: Vec<QaPair> = outcome.results.iter().filter_map(|r| r.to_qa_pair()).collect();
    let failures: Vec<FailedJob> = outcome
        .results
        .iter()
        .filter_map(|r| r.to_failed_job())
        .collect();
    sink.write_results(&pairs).await?;
    sink.write_failures(&failures).await?;

    tracing::info!(
        run_id = %outcome.run_id,
        results = pairs.len(),
        failures = failures.len(),
        cache_hits = outcome.cache.hits,
        peak_in_flight = outcome.peak_in_flight,
        "Run artifacts written"
    );

    Ok(outcome)
}

/// Picks `max` jobs at random, keeping their relative source order.
pub fn sample_jobs(jobs: Vec<Job>, max: usize, seed: Option<u64>) -> Vec<Job> {
    if jobs.len() <= max {
        return jobs;
    }

    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };
    let mut indices: Vec<usize> = (0..jobs.len()).collect();
    indices.shuffle(&mut rng);
    indices.truncate(max);
    indices.sort_unstable();

    let mut keep = vec![false; jobs.len()];
    for i in indices {
        keep[i] = true;
    }
    jobs.into_iter()
        .zip(keep)
        .filter_map(|(job, kept)| kept.then_some(job))
        .collect()
}

/// Counts selected jobs per country and topic, both sorted by name.
pub fn question_distribution(jobs: &[Job]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut distribution: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for job in jobs {
        *distribution
            .entry(job.country.clone())
            .or_default()
            .entry(job.topic.clone())
            .or_default() += 1;
    }
    distribution
}
