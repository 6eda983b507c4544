//! Answer synthesis on top of an [`LlmProvider`].
//!
//! [`AnswerGenerator`] is the narrow interface the QA pipeline depends on:
//! a question, the retrieved context and its references go in, an answer
//! comes out. [`LlmAnswerGenerator`] is the production adapter; tests swap in
//! fakes.

use std::sync::Arc;

use async_trait::async_trait;

use super::{GenerationRequest, LlmProvider, Message};
use crate::error::LlmError;
use crate::retrieval::Reference;

/// System prompt for the travel-information assistant persona.
pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are a friendly travel information assistant.
You specialize in accurate information about visa requirements, insurance, and immigration procedures.

GUIDELINES:
1. Never say "based on the context", "according to the provided information" or similar phrases.
2. Answer directly and naturally, as if you already know the information.
3. Be conversational and helpful.
4. When you have specific information about the topic, share it confidently.
5. When you do not, give general helpful advice.

You are talking with a traveler who needs help. Do not mention contexts, documents or information sources."#;

/// Sampling temperature used for answer generation.
const ANSWER_TEMPERATURE: f64 = 0.0;

/// Token cap for a single answer.
const ANSWER_MAX_TOKENS: u32 = 1000;

/// Generation Client interface consumed by the pipeline.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer for `query` given retrieved `context` and `references`.
    ///
    /// An empty `context` is valid and means retrieval found nothing.
    async fn generate(
        &self,
        query: &str,
        context: &str,
        references: &[Reference],
    ) -> Result<String, LlmError>;
}

/// Answer generator backed by a chat-completions provider.
pub struct LlmAnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmAnswerGenerator {
    /// Creates a generator that sends requests for `model` through `provider`.
    ///
    /// An empty model name defers to the provider's default model.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Builds the chat messages for one question.
    pub fn build_messages(&self, query: &str, context: &str) -> Vec<Message> {
        vec![
            Message::system(ANSWER_SYSTEM_PROMPT),
            Message::user(user_prompt(query, context)),
        ]
    }
}

/// Formats the user turn, switching to the no-context wording when retrieval
/// came back empty.
pub fn user_prompt(query: &str, context: &str) -> String {
    if context.trim().is_empty() {
        format!(
            "Query: {query}\n\nPlease provide a helpful answer to this query.",
            query = query
        )
    } else {
        format!(
            "Query: {query}\n\nRelevant Information:\n{context}\n\nPlease provide a direct and natural answer to the query.",
            query = query,
            context = context
        )
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(
        &self,
        query: &str,
        context: &str,
        references: &[Reference],
    ) -> Result<String, LlmError> {
        let request = GenerationRequest::new(&self.model, self.build_messages(query, context))
            .with_temperature(ANSWER_TEMPERATURE)
            .with_max_tokens(ANSWER_MAX_TOKENS);

        tracing::debug!(
            model = %self.model,
            references = references.len(),
            has_context = !context.trim().is_empty(),
            "Requesting answer"
        );

        let response = self.provider.generate(request).await?;
        let answer = response.first_content().map(str::trim).unwrap_or_default();
        if answer.is_empty() {
            return Err(LlmError::EmptyAnswer);
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse};
    use std::sync::Mutex;

    struct RecordingProvider {
        reply: String,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.seen.lock().expect("lock").push(request);
            Ok(GenerationResponse {
                id: "r".to_string(),
                model: "m".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.reply.clone()),
                    finish_reason: "stop".to_string(),
                }],
                usage: None,
            })
        }
    }

    #[test]
    fn test_user_prompt_with_context() {
        let prompt = user_prompt("How long is a tourist visa?", "90 days in any 180.");
        assert!(prompt.contains("Relevant Information:\n90 days in any 180."));
    }

    #[test]
    fn test_user_prompt_without_context() {
        let prompt = user_prompt("How long is a tourist visa?", "   ");
        assert!(!prompt.contains("Relevant Information"));
        assert!(prompt.contains("helpful answer"));
    }

    #[tokio::test]
    async fn test_generate_sends_deterministic_request() {
        let provider = Arc::new(RecordingProvider {
            reply: "  Ninety days.  ".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let generator = LlmAnswerGenerator::new(provider.clone(), "gpt-3.5-turbo");

        let answer = generator
            .generate("How long?", "90 days.", &[])
            .await
            .expect("answer");

        assert_eq!(answer, "Ninety days.");
        let seen = provider.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].temperature, Some(0.0));
        assert_eq!(seen[0].max_tokens, Some(1000));
        assert_eq!(seen[0].messages[0].role, "system");
    }

    #[tokio::test]
    async fn test_blank_answer_is_an_error() {
        let provider = Arc::new(RecordingProvider {
            reply: "   ".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let generator = LlmAnswerGenerator::new(provider, "");

        let result = generator.generate("q", "", &[]).await;
        assert!(matches!(result, Err(LlmError::EmptyAnswer)));
    }
}
