//! OpenRouter provider implementation.
//!
//! OpenRouter exposes many hosted models behind a single OpenAI-compatible
//! endpoint, so the provider is a thin preset over [`LiteLlmClient`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider};
use crate::retry::RetryPolicy;

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// OpenRouter provider for LLM requests.
pub struct OpenRouterProvider {
    inner: LiteLlmClient,
    api_key: String,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider with the given API key and the
    /// default model.
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, LlmError> {
        Self::with_model(api_key, DEFAULT_MODEL.to_string(), timeout)
    }

    /// Create a new OpenRouter provider with a specific default model.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenRouter API key for authentication
    /// * `model` - Default model identifier (e.g., "openai/gpt-4o-mini")
    /// * `timeout` - Per-attempt HTTP timeout
    pub fn with_model(api_key: String, model: String, timeout: Duration) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model, timeout)
    }

    /// Create a new OpenRouter provider with custom base URL.
    ///
    /// Useful for testing or using OpenRouter-compatible proxies.
    pub fn with_custom_url(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let inner = LiteLlmClient::new(base_url, Some(api_key.clone()), model, timeout)?;
        Ok(Self { inner, api_key })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry_policy(retry);
        self
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        self.inner.api_base()
    }

    /// Get the default model.
    pub fn default_model(&self) -> &str {
        self.inner.default_model()
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.inner.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let provider =
            OpenRouterProvider::new("sk-or-1234567890".to_string(), Duration::from_secs(5))
                .expect("provider");
        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_api_key_masked() {
        let provider =
            OpenRouterProvider::new("sk-or-1234567890".to_string(), Duration::from_secs(5))
                .expect("provider");
        assert_eq!(provider.api_key_masked(), "sk-o...7890");

        let short = OpenRouterProvider::new("short".to_string(), Duration::from_secs(5))
            .expect("provider");
        assert_eq!(short.api_key_masked(), "*****");
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = OpenRouterProvider::new("  ".to_string(), Duration::from_secs(5));
        let Err(err) = result else {
            panic!("blank key should be rejected");
        };
        assert!(matches!(err, LlmError::MissingApiKey));
        assert!(err.to_string().contains("OpenRouter"));
    }
}
