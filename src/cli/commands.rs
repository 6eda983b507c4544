//! CLI command definitions for qa-forge.
//!
//! `generate` runs the QA-pair pipeline over a questions file or database,
//! `merge` rebuilds a result set from checkpoint files and `import` loads a
//! questions file into a SQLite database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LlmError;
use crate::llm::{LiteLlmClient, LlmAnswerGenerator, LlmProvider, OpenRouterProvider};
use crate::pipeline::{
    merge_checkpoints, run_pipeline, FailedJob, PipelineConfig, PipelineError, QaPair, RunStats,
};
use crate::retrieval::HttpRetrievalClient;
use crate::retry::RetryPolicy;
use crate::sink::{JsonFileSink, ResultSink};
use crate::source::{JsonQuestionFile, QuestionSource, SqliteQuestionSource};

/// QA-pair generator for retrieval-grounded fine-tuning data.
#[derive(Parser)]
#[command(name = "qa-forge")]
#[command(about = "Turn generated questions into question/answer/context training pairs")]
#[command(version)]
#[command(
    long_about = "qa-forge looks up supporting context for every generated question, asks an LLM \
                  for a grounded answer and writes the resulting QA pairs.\n\nExample usage:\n  \
                  qa-forge generate questions.json --output qa_pairs.json --concurrency 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate QA pairs for a set of questions.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Merge checkpoint files into a single result set.
    Merge(MergeArgs),

    /// Import a questions file into a SQLite database.
    Import(ImportArgs),
}

/// Arguments for the generate command.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Questions JSON file (`{"questions": [...]}` or a bare array).
    #[arg(required_unless_present = "db", conflicts_with = "db")]
    pub questions: Option<PathBuf>,

    /// Read questions from a SQLite database instead of a JSON file.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Output path for the QA pairs. Checkpoints and the failure log are
    /// written next to it.
    #[arg(short, long)]
    pub output: Option<String>,

    /// YAML configuration file. Without it, settings come from QAFORGE_* variables.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of jobs in flight.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Jobs per batch.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Process a random sample of at most this many questions.
    #[arg(long)]
    pub max_jobs: Option<usize>,

    /// Seed for the random sample.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write a checkpoint every N batches.
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Model used for answer generation.
    #[arg(short, long)]
    pub model: Option<String>,

    /// OpenRouter API key. Without it, the LiteLLM proxy at LITELLM_API_BASE is used.
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of the retrieval service.
    #[arg(long, env = "RETRIEVAL_API_BASE")]
    pub retrieval_url: String,

    /// API key for the retrieval service.
    #[arg(long, env = "RETRIEVAL_API_KEY")]
    pub retrieval_key: Option<String>,

    /// Print the run summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for the merge command.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Checkpoint files to merge.
    #[arg(required = true, num_args = 1..)]
    pub checkpoints: Vec<PathBuf>,

    /// Output path for the merged QA pairs.
    #[arg(short, long, default_value = "qa_pairs_merged.json")]
    pub output: String,

    /// Print the merge summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for the import command.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Questions JSON file to import.
    pub questions: PathBuf,

    /// SQLite database to create or update.
    #[arg(long, default_value = "questions.db")]
    pub db: PathBuf,
}

/// Summary printed by `generate --json`.
#[derive(Debug, Serialize)]
struct GenerateSummary {
    status: String,
    model: String,
    output_path: String,
    failures_path: String,
    total_duration_ms: u64,
    stats: RunStats,
}

/// Summary printed by `merge --json`.
#[derive(Debug, Serialize)]
struct MergeSummary {
    checkpoints: usize,
    results: usize,
    failures: usize,
    output_path: String,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Merge(args) => run_merge_command(args).await,
        Commands::Import(args) => run_import_command(args).await,
    }
}

/// Builds the run configuration: YAML file or environment first, then
/// command-line overrides.
fn build_config(args: &GenerateArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)?,
        None => PipelineConfig::from_env()?,
    };

    if let Some(output) = &args.output {
        config = config.with_output_path(output.clone());
    }
    if let Some(limit) = args.concurrency {
        config = config.with_concurrency_limit(limit);
    }
    if let Some(size) = args.batch_size {
        config = config.with_batch_size(size);
    }
    if let Some(max) = args.max_jobs {
        config = config.with_max_jobs(max);
    }
    if let Some(seed) = args.seed {
        config = config.with_sample_seed(seed);
    }
    if let Some(every) = args.checkpoint_every {
        config = config.with_checkpoint_every(every);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Picks the chat-completions backend: OpenRouter when a key is available,
/// otherwise the LiteLLM proxy from the environment.
///
/// Returns the provider and the model name requests will use. Without an
/// explicit `model` that is the provider's own default.
fn build_llm_client(
    api_key: Option<String>,
    model: Option<&str>,
    timeout: Duration,
    retry: RetryPolicy,
) -> anyhow::Result<(Arc<dyn LlmProvider>, String)> {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        let provider = match model {
            Some(model) => OpenRouterProvider::with_model(key, model.to_string(), timeout)?,
            None => OpenRouterProvider::new(key, timeout)?,
        };
        let model = provider.default_model().to_string();
        info!(model = %model, "Using OpenRouter with specified API key");
        let provider: Arc<dyn LlmProvider> = Arc::new(provider.with_retry_policy(retry));
        return Ok((provider, model));
    }

    let client = match LiteLlmClient::from_env(timeout) {
        Ok(client) => client,
        Err(LlmError::MissingApiBase) => anyhow::bail!(
            "No LLM backend configured. Please provide --api-key or set \
             OPENROUTER_API_KEY/LITELLM_API_BASE env var."
        ),
        Err(e) => return Err(e.into()),
    };
    let model = model.unwrap_or(client.default_model()).to_string();
    info!(model = %model, api_base = %client.api_base(), "Using LiteLLM client from environment");
    let provider: Arc<dyn LlmProvider> = Arc::new(client.with_retry_policy(retry));
    Ok((provider, model))
}

/// Waits for Ctrl-C and cancels the run.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch is abandoned");
            cancel.cancel();
        }
    });
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;

    let source: Box<dyn QuestionSource> = match (&args.db, &args.questions) {
        (Some(db), _) => Box::new(SqliteQuestionSource::open(db).await?),
        (None, Some(path)) => Box::new(JsonQuestionFile::new(path)),
        (None, None) => anyhow::bail!("Provide a questions file or --db"),
    };

    let (provider, model) = build_llm_client(
        args.api_key.clone(),
        config.model.as_deref(),
        config.request_timeout,
        config.retry_policy(),
    )?;
    let generator = Arc::new(LlmAnswerGenerator::new(provider, model.clone()));
    let retriever = Arc::new(
        HttpRetrievalClient::new(
            args.retrieval_url.clone(),
            args.retrieval_key.clone(),
            config.request_timeout,
        )?
        .with_retry_policy(config.retry_policy()),
    );
    let sink = Arc::new(JsonFileSink::new(&config.output_path));
    let failures_path = sink.failures_path();

    info!(
        source = %source.describe(),
        output = %config.output_path.display(),
        concurrency = config.concurrency_limit,
        batch_size = config.batch_size,
        model = %model,
        "Starting QA-pair generation"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let start = Instant::now();
    let stats = match run_pipeline(
        source.as_ref(),
        sink,
        retriever,
        generator,
        &config,
        cancel,
    )
    .await
    {
        Ok(stats) => stats,
        Err(PipelineError::Cancelled {
            completed,
            checkpoint,
        }) => {
            match checkpoint {
                Some(location) => warn!(
                    completed = completed,
                    checkpoint = %location,
                    "Run cancelled; partial results saved to checkpoint"
                ),
                None => warn!(completed = completed, "Run cancelled"),
            }
            anyhow::bail!("Run cancelled after {} completed jobs", completed);
        }
        Err(e) => return Err(e.into()),
    };

    let summary = GenerateSummary {
        status: if stats.success == 0 && stats.total > 0 {
            "failed".to_string()
        } else {
            "success".to_string()
        },
        model,
        output_path: config.output_path.display().to_string(),
        failures_path: failures_path.display().to_string(),
        total_duration_ms: start.elapsed().as_millis() as u64,
        stats,
    };

    if args.json {
        let json_output = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print_generate_summary(&summary);
    }

    Ok(())
}

fn print_generate_summary(summary: &GenerateSummary) {
    let stats = &summary.stats;
    println!();
    println!("QA-pair generation {}", summary.status);
    println!("  Total questions: {}", stats.total);
    println!(
        "  Succeeded:       {} ({:.1}%)",
        stats.success,
        stats.success_rate() * 100.0
    );
    println!("  Failed:          {}", stats.failed);
    println!("  Cache hits:      {}", stats.cache_hits);
    println!("  Elapsed:         {:.1}s", stats.elapsed_secs);
    println!("  Results:         {}", summary.output_path);
    println!("  Failure log:     {}", summary.failures_path);

    if !stats.by_country.is_empty() {
        println!();
        println!("  By country:");
        for (country, counts) in &stats.by_country {
            println!(
                "    {:<20} {:>5}/{:<5} {:.1}%",
                country,
                counts.success,
                counts.total(),
                counts.success_rate() * 100.0
            );
        }
    }
    if !stats.by_topic.is_empty() {
        println!();
        println!("  By topic:");
        for (topic, counts) in &stats.by_topic {
            println!(
                "    {:<20} {:>5}/{:<5} {:.1}%",
                topic,
                counts.success,
                counts.total(),
                counts.success_rate() * 100.0
            );
        }
    }
}

async fn run_merge_command(args: MergeArgs) -> anyhow::Result<()> {
    let merged = merge_checkpoints(&args.checkpoints[..]).await?;

    let pairs: Vec<QaPair> = merged.iter().filter_map(|r| r.to_qa_pair()).collect();
    let failures: Vec<FailedJob> = merged.iter().filter_map(|r| r.to_failed_job()).collect();

    let sink = JsonFileSink::new(&args.output);
    sink.write_results(&pairs).await?;
    sink.write_failures(&failures).await?;

    info!(
        checkpoints = args.checkpoints.len(),
        results = pairs.len(),
        failures = failures.len(),
        output = %args.output,
        "Checkpoints merged"
    );

    let summary = MergeSummary {
        checkpoints: args.checkpoints.len(),
        results: pairs.len(),
        failures: failures.len(),
        output_path: args.output,
    };

    if args.json {
        let json_output = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        println!(
            "Merged {} checkpoints: {} QA pairs, {} failures -> {}",
            summary.checkpoints, summary.results, summary.failures, summary.output_path
        );
    }

    Ok(())
}

async fn run_import_command(args: ImportArgs) -> anyhow::Result<()> {
    let records = JsonQuestionFile::new(&args.questions).load().await?;
    let db = SqliteQuestionSource::create(&args.db).await?;
    db.insert(&records).await?;
    let total = db.count().await?;

    info!(
        imported = records.len(),
        total = total,
        db = %args.db.display(),
        "Questions imported"
    );
    println!(
        "Imported {} questions into {} ({} total)",
        records.len(),
        args.db.display(),
        total
    );
    Ok(())
}
