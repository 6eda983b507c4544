//! Pipeline configuration for the QA generation run.
//!
//! This module provides the knobs of a run: admission limit, batch layout,
//! sampling, checkpoint cadence, context truncation, timeouts and retry
//! budget, failure alerting and output location. Values come from defaults,
//! `QAFORGE_*` environment variables, a YAML file, or builder calls.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// External calls per job: one retrieval search, one answer generation.
const JOB_EXTERNAL_CALLS: u32 = 2;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file could not be parsed.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Admission and batching
    /// Maximum number of jobs holding an admission permit at once.
    pub concurrency_limit: usize,
    /// Number of consecutive jobs fanned out together.
    pub batch_size: usize,
    /// If set, a random subset of this many questions is processed.
    pub max_jobs: Option<usize>,
    /// Seed for the subset sampling; unseeded sampling uses thread RNG.
    pub sample_seed: Option<u64>,

    // Checkpointing
    /// A checkpoint is written after every this many batches.
    pub checkpoint_every_batches: usize,

    // Job processing
    /// Stored contexts are truncated to this many characters.
    pub context_char_limit: usize,
    /// Per-attempt HTTP timeout for external services.
    pub request_timeout: Duration,
    /// Upper bound on a whole job: retrieval and generation with their
    /// retries, plus any wait on a duplicate's in-flight resolution. Defaults
    /// to [`PipelineConfig::worst_case_job_time`] unless set explicitly.
    pub job_timeout: Duration,
    /// Attempts per external call on transient errors.
    pub max_retries: u32,
    /// Base backoff delay between retry attempts.
    pub retry_base_delay: Duration,

    // Reporting
    /// A batch failure ratio above this logs a warning.
    pub failure_warn_ratio: f64,
    /// Interval of the background progress log.
    pub progress_interval: Duration,

    // Output
    /// Results file; failures and checkpoints are written next to it.
    pub output_path: PathBuf,
    /// Model name passed to the generation service. `None` uses the
    /// selected provider's default model.
    pub model: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut config = Self {
            concurrency_limit: 8,
            batch_size: 50,
            max_jobs: None,
            sample_seed: None,

            checkpoint_every_batches: 5,

            context_char_limit: 1000,
            request_timeout: Duration::from_secs(60),
            job_timeout: Duration::ZERO,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),

            failure_warn_ratio: 0.10,
            progress_interval: Duration::from_secs(30),

            output_path: PathBuf::from("qa_pairs.json"),
            model: None,
        };
        config.job_timeout = config.worst_case_job_time();
        config
    }
}

/// On-disk shape of a YAML configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    concurrency_limit: Option<usize>,
    batch_size: Option<usize>,
    max_jobs: Option<usize>,
    sample_seed: Option<u64>,
    checkpoint_every_batches: Option<usize>,
    context_char_limit: Option<usize>,
    request_timeout_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    failure_warn_ratio: Option<f64>,
    progress_interval_secs: Option<u64>,
    output_path: Option<PathBuf>,
    model: Option<String>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QAFORGE_CONCURRENCY`: Admission limit (default: 8)
    /// - `QAFORGE_BATCH_SIZE`: Jobs per batch (default: 50)
    /// - `QAFORGE_MAX_JOBS`: Random subset size (default: all)
    /// - `QAFORGE_SAMPLE_SEED`: Seed for subset sampling
    /// - `QAFORGE_CHECKPOINT_EVERY`: Batches between checkpoints (default: 5)
    /// - `QAFORGE_CONTEXT_CHAR_LIMIT`: Stored context length (default: 1000)
    /// - `QAFORGE_REQUEST_TIMEOUT_SECS`: Per-attempt timeout (default: 60)
    /// - `QAFORGE_JOB_TIMEOUT_SECS`: Per-job timeout (default: derived from
    ///   the request timeout and retry budget, 366 with the other defaults)
    /// - `QAFORGE_MAX_RETRIES`: Attempts per external call (default: 3)
    /// - `QAFORGE_FAILURE_WARN_RATIO`: Batch failure alert threshold (default: 0.10)
    /// - `QAFORGE_PROGRESS_INTERVAL_SECS`: Progress log interval (default: 30)
    /// - `QAFORGE_OUTPUT`: Results file (default: qa_pairs.json)
    /// - `QAFORGE_MODEL`: Generation model (default: the provider's default)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_var("QAFORGE_CONCURRENCY") {
            config.concurrency_limit = parse_env_value(&val, "QAFORGE_CONCURRENCY")?;
        }
        if let Some(val) = env_var("QAFORGE_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "QAFORGE_BATCH_SIZE")?;
        }
        if let Some(val) = env_var("QAFORGE_MAX_JOBS") {
            config.max_jobs = Some(parse_env_value(&val, "QAFORGE_MAX_JOBS")?);
        }
        if let Some(val) = env_var("QAFORGE_SAMPLE_SEED") {
            config.sample_seed = Some(parse_env_value(&val, "QAFORGE_SAMPLE_SEED")?);
        }

        if let Some(val) = env_var("QAFORGE_CHECKPOINT_EVERY") {
            config.checkpoint_every_batches = parse_env_value(&val, "QAFORGE_CHECKPOINT_EVERY")?;
        }

        if let Some(val) = env_var("QAFORGE_CONTEXT_CHAR_LIMIT") {
            config.context_char_limit = parse_env_value(&val, "QAFORGE_CONTEXT_CHAR_LIMIT")?;
        }
        if let Some(val) = env_var("QAFORGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "QAFORGE_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = env_var("QAFORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "QAFORGE_MAX_RETRIES")?;
        }
        config.job_timeout = match env_var("QAFORGE_JOB_TIMEOUT_SECS") {
            Some(val) => {
                let secs: u64 = parse_env_value(&val, "QAFORGE_JOB_TIMEOUT_SECS")?;
                Duration::from_secs(secs)
            }
            None => config.worst_case_job_time(),
        };

        if let Some(val) = env_var("QAFORGE_FAILURE_WARN_RATIO") {
            config.failure_warn_ratio = parse_env_value(&val, "QAFORGE_FAILURE_WARN_RATIO")?;
        }
        if let Some(val) = env_var("QAFORGE_PROGRESS_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "QAFORGE_PROGRESS_INTERVAL_SECS")?;
            config.progress_interval = Duration::from_secs(secs);
        }

        if let Some(val) = env_var("QAFORGE_OUTPUT") {
            config.output_path = PathBuf::from(val);
        }
        if let Some(val) = env_var("QAFORGE_MODEL") {
            config.model = Some(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file, starting from defaults.
    ///
    /// Durations are given in seconds (`*_secs`) except the retry delay,
    /// which is in milliseconds (`retry_base_delay_ms`).
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parses configuration from a YAML string, starting from defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if raw.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };

        let mut config = Self::default();
        if let Some(v) = file.concurrency_limit {
            config.concurrency_limit = v;
        }
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        config.max_jobs = file.max_jobs.or(config.max_jobs);
        config.sample_seed = file.sample_seed.or(config.sample_seed);
        if let Some(v) = file.checkpoint_every_batches {
            config.checkpoint_every_batches = v;
        }
        if let Some(v) = file.context_char_limit {
            config.context_char_limit = v;
        }
        if let Some(v) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = file.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.failure_warn_ratio {
            config.failure_warn_ratio = v;
        }
        if let Some(v) = file.progress_interval_secs {
            config.progress_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.output_path {
            config.output_path = v;
        }
        config.model = file.model.or(config.model);
        config.job_timeout = match file.job_timeout_secs {
            Some(v) => Duration::from_secs(v),
            None => config.worst_case_job_time(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency_limit must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_jobs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_jobs must be greater than 0 when set".to_string(),
            ));
        }

        if self.checkpoint_every_batches == 0 {
            return Err(ConfigError::ValidationFailed(
                "checkpoint_every_batches must be greater than 0".to_string(),
            ));
        }

        if self.context_char_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "context_char_limit must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        // A job makes at least one request; a shorter bound fails every job.
        // Bounds below `worst_case_job_time` are allowed and cut retries short.
        if self.job_timeout < self.request_timeout {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be at least request_timeout".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.failure_warn_ratio) {
            return Err(ConfigError::ValidationFailed(
                "failure_warn_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Retry policy for external calls derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay)
    }

    /// Longest a job can take when both of its external calls exhaust their
    /// retry budget: two calls, each with every attempt hitting
    /// `request_timeout`, plus the backoff between attempts.
    pub fn worst_case_job_time(&self) -> Duration {
        let per_call = self.retry_policy().worst_case_duration(self.request_timeout);
        per_call.saturating_mul(JOB_EXTERNAL_CALLS)
    }

    /// Builder method to set the admission limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder method to sample a subset of the source.
    pub fn with_max_jobs(mut self, max: usize) -> Self {
        self.max_jobs = Some(max);
        self
    }

    /// Builder method to seed the subset sampling.
    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }

    /// Builder method to set the checkpoint cadence.
    pub fn with_checkpoint_every(mut self, batches: usize) -> Self {
        self.checkpoint_every_batches = batches;
        self
    }

    /// Builder method to set the stored context length.
    pub fn with_context_char_limit(mut self, limit: usize) -> Self {
        self.context_char_limit = limit;
        self
    }

    /// Builder method to set the per-attempt request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to set the per-job timeout.
    ///
    /// The request timeout and retry builders leave the job timeout alone,
    /// so set it last when changing those.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Builder method to set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method to set the failure alert threshold.
    pub fn with_failure_warn_ratio(mut self, ratio: f64) -> Self {
        self.failure_warn_ratio = ratio;
        self
    }

    /// Builder method to set the progress log interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Builder method to set the results file.
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Builder method to set the generation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable value into a type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
