//! Hosted LLM provider implementations.
//!
//! Each provider implements [`LlmProvider`] and can back the answer
//! generator used by the QA pipeline.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;

pub use super::litellm::LlmProvider;
