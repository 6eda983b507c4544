//! qa-forge: retrieval-grounded QA-pair generation for fine-tuning datasets.
//!
//! This library turns generated questions into question/answer/context
//! triples: each question is matched against a retrieval service and an LLM
//! writes an answer grounded in the retrieved passages. Jobs run in batches
//! under a fixed concurrency limit, with memoization, checkpoints and
//! per-country/per-topic statistics.

// Core modules
pub mod cli;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod retry;
pub mod sink;
pub mod source;

// Re-export commonly used error types
pub use error::{LlmError, RetrievalError, SinkError, SourceError};
