//! Error types for qa-forge operations.
//!
//! Defines error types for the external collaborators of the pipeline:
//! - LLM API interactions (answer generation)
//! - Retrieval service lookups (context search)
//! - Question sources (durable input)
//! - Result sinks (durable output and checkpoints)
//!
//! Run-level failures are aggregated by [`crate::pipeline::PipelineError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OpenRouter requires a non-empty key (--api-key or OPENROUTER_API_KEY)")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("LLM returned an empty answer")]
    EmptyAnswer,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors that can occur while looking up context in the retrieval service.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval request failed: {0}")]
    RequestFailed(String),

    #[error("Retrieval request timed out")]
    Timeout,

    #[error("Rate limited by retrieval service: {0}")]
    RateLimited(String),

    #[error("Retrieval service error ({code}): {message}")]
    ServiceError { code: u16, message: String },

    #[error("Failed to parse retrieval response: {0}")]
    ParseError(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors that can occur while loading questions.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Question source not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid question record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while persisting results.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Output directory could not be created: {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing checkpoint: {0}")]
    CheckpointExists(PathBuf),

    #[error("Checkpoint task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
