//! End-to-end pipeline scenarios with scripted retrieval and generation.
//!
//! No network access is needed: both external services are replaced by
//! in-process fakes that record how often they are called.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use qa_forge::error::{LlmError, RetrievalError};
use qa_forge::llm::AnswerGenerator;
use qa_forge::pipeline::{
    merge_checkpoints, run_pipeline, run_pipeline_with_events, PipelineConfig, PipelineError,
    PipelineEvent, RunOutcome,
};
use qa_forge::retrieval::{ContextRetriever, Reference, RetrievalResult};
use qa_forge::sink::{JsonFileSink, MemorySink, ResultSink};
use qa_forge::source::{QuestionRecord, SqliteQuestionSource, StaticQuestions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Retriever that fails for queries containing "boom" and returns no
/// context for queries containing "nothing".
#[derive(Default)]
struct ScriptedRetriever {
    calls: AtomicUsize,
}

#[async_trait]
impl ContextRetriever for ScriptedRetriever {
    async fn search(
        &self,
        query: &str,
        country: &str,
        doc_type: &str,
    ) -> Result<RetrievalResult, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.contains("boom") {
            return Err(RetrievalError::ServiceError {
                code: 503,
                message: "index unavailable".to_string(),
            });
        }
        if query.contains("nothing") {
            return Ok(RetrievalResult::empty());
        }
        Ok(RetrievalResult {
            context: format!("{} {} guidance for: {}", country, doc_type, query),
            references: vec![Reference {
                title: doc_type.to_string(),
                country: country.to_string(),
                tag: format!("{}_{}", country, doc_type),
                updated_at: "2024-01-01".to_string(),
            }],
        })
    }
}

/// Generator that sleeps for a fixed delay and tracks concurrent calls.
#[derive(Default)]
struct TimedGenerator {
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl TimedGenerator {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AnswerGenerator for TimedGenerator {
    async fn generate(
        &self,
        query: &str,
        context: &str,
        _references: &[Reference],
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if context.is_empty() {
            Ok(format!("I could not find guidance for: {}", query))
        } else {
            Ok(format!("Answer to: {}", query))
        }
    }
}

fn question(id: &str, country: &str, topic: &str, text: &str) -> QuestionRecord {
    QuestionRecord {
        id: id.to_string(),
        country: country.to_string(),
        topic: topic.to_string(),
        question: text.to_string(),
    }
}

fn numbered_questions(n: usize) -> Vec<QuestionRecord> {
    let countries = ["France", "Japan", "Korea"];
    let topics = ["visa", "insurance", "safety"];
    (0..n)
        .map(|i| {
            question(
                &format!("q{:03}", i),
                countries[i % countries.len()],
                topics[i % topics.len()],
                &format!("Distinct question number {}?", i),
            )
        })
        .collect()
}

async fn run_with_events(
    questions: Vec<QuestionRecord>,
    sink: Arc<dyn ResultSink>,
    retriever: Arc<ScriptedRetriever>,
    generator: Arc<TimedGenerator>,
    config: PipelineConfig,
) -> (RunOutcome, Vec<PipelineEvent>) {
    let (tx, mut rx) = mpsc::channel(1024);
    let outcome = run_pipeline_with_events(
        &StaticQuestions(questions),
        sink,
        retriever,
        generator,
        &config,
        CancellationToken::new(),
        Some(tx),
    )
    .await
    .expect("run should succeed");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

#[tokio::test]
async fn test_three_questions_mixed_outcomes() {
    let sink = Arc::new(MemorySink::new());
    let retriever = Arc::new(ScriptedRetriever::default());
    let generator = Arc::new(TimedGenerator::default());

    let questions = vec![
        question("1", "France", "visa", "Do I need a visa for a short stay?"),
        question("2", "France", "insurance", "Is there nothing about insurance?"),
        question("3", "Japan", "visa", "What happens on boom?"),
    ];

    let stats = run_pipeline(
        &StaticQuestions(questions),
        sink.clone(),
        retriever.clone(),
        generator.clone(),
        &PipelineConfig::default(),
        CancellationToken::new(),
    )
    .await
    .expect("run should succeed");

    assert_eq!(stats.total, 3);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.failed, 1);

    let results = sink.results();
    let ids: Vec<_> = results.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert!(results[1].context.is_empty());
    assert!(results[1].answer.contains("could not find"));

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].question_id, "3");
    assert!(failures[0].error.contains("retrieval failed"));
    assert!(failures[0].error.contains("index unavailable"));

    // The failed job never reaches generation
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 3);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_batches_run_in_order_with_checkpoint_cadence() {
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig::default()
        .with_batch_size(2)
        .with_checkpoint_every(2);

    let (outcome, events) = run_with_events(
        numbered_questions(5),
        sink.clone(),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::default()),
        config,
    )
    .await;

    assert_eq!(outcome.batches, 3);

    let started: Vec<(usize, usize)> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::BatchStarted { index, size } => Some((*index, *size)),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![(0, 2), (1, 2), (2, 1)]);

    // Each batch completes before the next one starts
    let sequence: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::BatchStarted { index, .. } => Some(format!("start {}", index)),
            PipelineEvent::BatchCompleted { index, .. } => Some(format!("done {}", index)),
            _ => None,
        })
        .collect();
    assert_eq!(
        sequence,
        vec!["start 0", "done 0", "start 1", "done 1", "start 2", "done 2"]
    );

    // Only the second batch falls on the cadence
    let checkpoints = sink.checkpoints();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].completed_jobs, 4);
    assert_eq!(outcome.checkpoints, 1);

    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { total_jobs: 5, .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::RunCompleted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::CheckpointWritten { completed: 4, .. })));
}

#[tokio::test]
async fn test_checkpoint_after_every_batch() {
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig::default()
        .with_batch_size(2)
        .with_checkpoint_every(1);

    let (_, events) = run_with_events(
        numbered_questions(5),
        sink.clone(),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::default()),
        config,
    )
    .await;

    let completed: Vec<usize> = sink.checkpoints().iter().map(|c| c.completed_jobs).collect();
    assert_eq!(completed, vec![2, 4, 5]);

    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::CheckpointWritten { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_concurrency_one_serializes_jobs() {
    let delay = Duration::from_millis(100);
    let generator = Arc::new(TimedGenerator::with_delay(delay));
    let config = PipelineConfig::default()
        .with_concurrency_limit(1)
        .with_batch_size(4);

    let start = Instant::now();
    let (outcome, _) = run_with_events(
        numbered_questions(4),
        Arc::new(MemorySink::new()),
        Arc::new(ScriptedRetriever::default()),
        generator.clone(),
        config,
    )
    .await;
    let elapsed = start.elapsed();

    assert_eq!(outcome.stats.success, 4);
    assert!(elapsed >= delay * 4, "elapsed {:?}", elapsed);
    assert_eq!(generator.peak.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.peak_in_flight, 1);
}

#[tokio::test]
async fn test_concurrency_limit_allows_parallel_jobs() {
    let delay = Duration::from_millis(100);
    let config = PipelineConfig::default()
        .with_concurrency_limit(4)
        .with_batch_size(4);

    let start = Instant::now();
    let (outcome, _) = run_with_events(
        numbered_questions(4),
        Arc::new(MemorySink::new()),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::with_delay(delay)),
        config,
    )
    .await;

    assert_eq!(outcome.stats.success, 4);
    assert!(start.elapsed() < delay * 4);
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limit() {
    let generator = Arc::new(TimedGenerator::with_delay(Duration::from_millis(20)));
    let config = PipelineConfig::default()
        .with_concurrency_limit(3)
        .with_batch_size(10);

    let (outcome, _) = run_with_events(
        numbered_questions(25),
        Arc::new(MemorySink::new()),
        Arc::new(ScriptedRetriever::default()),
        generator.clone(),
        config,
    )
    .await;

    assert_eq!(outcome.stats.total, 25);
    assert!(outcome.peak_in_flight <= 3);
    assert!(generator.peak.load(Ordering::SeqCst) <= 3);
    assert!(outcome.peak_in_flight >= 1);
}

#[tokio::test]
async fn test_duplicate_questions_resolve_once() {
    let retriever = Arc::new(ScriptedRetriever::default());
    let generator = Arc::new(TimedGenerator::with_delay(Duration::from_millis(30)));
    let sink = Arc::new(MemorySink::new());

    let questions = vec![
        question("a", "France", "visa", "Do I need a visa?"),
        question("b", " france ", "visa", "  do i need a   VISA? "),
    ];

    let (outcome, _) = run_with_events(
        questions,
        sink.clone(),
        retriever.clone(),
        generator.clone(),
        PipelineConfig::default(),
    )
    .await;

    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.cache.hits, 1);
    assert_eq!(outcome.stats.cache_hits, 1);

    let pairs = sink.results();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].answer, pairs[1].answer);
    assert_eq!(pairs[0].context, pairs[1].context);
    assert_ne!(pairs[0].id, pairs[1].id);
}

#[tokio::test]
async fn test_duplicates_across_batches_hit_cache() {
    let retriever = Arc::new(ScriptedRetriever::default());
    let generator = Arc::new(TimedGenerator::default());

    let questions = vec![
        question("1", "Korea", "insurance", "Is travel insurance required?"),
        question("2", "Korea", "visa", "Can I work on a tourist visa?"),
        question("3", "Korea", "insurance", "Is travel insurance required?"),
    ];

    let (outcome, _) = run_with_events(
        questions,
        Arc::new(MemorySink::new()),
        retriever.clone(),
        generator.clone(),
        PipelineConfig::default().with_batch_size(2),
    )
    .await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.cache.hits, 1);
    assert!(outcome.results[2].is_success());
}

#[tokio::test]
async fn test_accounting_invariant_holds() {
    let mut questions = numbered_questions(20);
    for q in questions.iter_mut().step_by(4) {
        q.question = format!("{} boom", q.question);
    }
    let failing = questions.iter().filter(|q| q.question.contains("boom")).count();

    let (outcome, events) = run_with_events(
        questions,
        Arc::new(MemorySink::new()),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::default()),
        PipelineConfig::default().with_batch_size(6),
    )
    .await;

    let stats = &outcome.stats;
    assert_eq!(stats.success + stats.failed, stats.total);
    assert_eq!(stats.total, 20);
    assert_eq!(stats.failed, failing as u64);

    let by_country: u64 = stats.by_country.values().map(|c| c.total()).sum();
    let by_topic: u64 = stats.by_topic.values().map(|c| c.total()).sum();
    assert_eq!(by_country, 20);
    assert_eq!(by_topic, 20);

    // 25% failures per batch is above the default warning threshold
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::HighFailureRate { .. })));
}

#[tokio::test]
async fn test_checkpoint_files_reconstruct_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("qa_pairs.json");
    let sink = Arc::new(JsonFileSink::new(&output));
    let config = PipelineConfig::default()
        .with_batch_size(3)
        .with_checkpoint_every(2)
        .with_output_path(&output);

    let (outcome, events) = run_with_events(
        numbered_questions(14),
        sink,
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::default()),
        config,
    )
    .await;

    let locations: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::CheckpointWritten { location, .. } => Some(location.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(locations.len(), 2);
    assert!(locations[0].ends_with(".backup_6"));
    assert!(locations[1].ends_with(".backup_12"));

    let merged = merge_checkpoints(&locations[..]).await.expect("merge");
    let merged_ids: Vec<_> = merged.iter().map(|r| r.job.id.clone()).collect();
    let final_ids: Vec<_> = outcome.results.iter().map(|r| r.job.id.clone()).collect();
    assert_eq!(merged_ids.len(), 12);
    assert_eq!(merged_ids[..], final_ids[..12]);

    let unique: HashSet<_> = merged_ids.iter().collect();
    assert_eq!(unique.len(), merged_ids.len());

    assert!(output.exists());
    assert!(dir.path().join("qa_pairs_failed.json").exists());
}

#[tokio::test]
async fn test_sqlite_source_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = SqliteQuestionSource::create(dir.path().join("questions.db"))
        .await
        .expect("create db");
    db.insert(&numbered_questions(4)).await.expect("insert");

    let sink = Arc::new(MemorySink::new());
    let stats = run_pipeline(
        &db,
        sink.clone(),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::default()),
        &PipelineConfig::default().with_max_jobs(3).with_sample_seed(11),
        CancellationToken::new(),
    )
    .await
    .expect("run should succeed");

    assert_eq!(stats.total, 3);
    assert_eq!(sink.results().len(), 3);
}

#[tokio::test]
async fn test_cancelled_run_reports_checkpoint() {
    let sink = Arc::new(MemorySink::new());
    let cancel = CancellationToken::new();
    let config = PipelineConfig::default()
        .with_concurrency_limit(2)
        .with_batch_size(2);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = run_pipeline(
        &StaticQuestions(numbered_questions(20)),
        sink.clone(),
        Arc::new(ScriptedRetriever::default()),
        Arc::new(TimedGenerator::with_delay(Duration::from_millis(100))),
        &config,
        cancel,
    )
    .await;

    match result {
        Err(PipelineError::Cancelled {
            completed,
            checkpoint,
        }) => {
            assert!(completed < 20);
            assert_eq!(completed % 2, 0);
            assert!(checkpoint.is_some());
        }
        other => panic!("expected cancellation, got {:?}", other.map(|s| s.total)),
    }

    // Nothing final is written for an aborted run
    assert!(sink.results().is_empty());
    let last = sink.checkpoints().pop().expect("checkpoint on cancel");
    assert_eq!(last.results.len(), last.completed_jobs);
}
