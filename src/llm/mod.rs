//! LLM integration for qa-forge.
//!
//! This module provides the chat-completions clients used to synthesize
//! answers, and the [`AnswerGenerator`] interface the pipeline consumes.
//!
//! ```ignore
//! use qa_forge::llm::{LiteLlmClient, LlmAnswerGenerator, AnswerGenerator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = Arc::new(LiteLlmClient::from_env(Duration::from_secs(60))?);
//! let generator = LlmAnswerGenerator::new(client, "gpt-3.5-turbo");
//! let answer = generator.generate("Do I need a visa?", &context, &references).await?;
//! ```

pub mod answer;
pub mod litellm;
pub mod providers;

pub use answer::{AnswerGenerator, LlmAnswerGenerator, ANSWER_SYSTEM_PROMPT};
pub use litellm::{
    is_transient_error, Choice, GenerationRequest, GenerationResponse, LiteLlmClient,
    LlmProvider, Message, Usage,
};
pub use providers::OpenRouterProvider;
