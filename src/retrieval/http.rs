//! HTTP adapter for an external vector-search service.
//!
//! The service is expected to accept
//! `POST <base>/search` with `{query, tag, k, search_type}` and answer with
//! `{documents: [{content, metadata: {document_type, country, tag, updated_at}}]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{index_tag, ContextRetriever, Reference, RetrievalResult, CONTEXT_SEPARATOR};
use crate::error::RetrievalError;
use crate::retry::RetryPolicy;

/// Number of candidates requested from the index.
const SEARCH_K: usize = 5;

/// Number of top documents joined into the context.
const MAX_CONTEXT_DOCUMENTS: usize = 3;

/// Client for the retrieval service.
pub struct HttpRetrievalClient {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
    retry: RetryPolicy,
}

impl HttpRetrievalClient {
    /// Creates a client for the service at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::ClientBuild(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute_request(&self, request: &SearchRequest) -> Result<SearchResponse, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let mut http_request = self.http_client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", key));
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout
            } else {
                RetrievalError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            if code == 429 {
                return Err(RetrievalError::RateLimited(message));
            }
            return Err(RetrievalError::ServiceError { code, message });
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| RetrievalError::ParseError(e.to_string()))
    }
}

/// Check if a retrieval error is transient and should be retried.
pub fn is_transient_retrieval_error(error: &RetrievalError) -> bool {
    match error {
        RetrievalError::Timeout | RetrievalError::RateLimited(_) => true,
        RetrievalError::RequestFailed(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("connection") || msg.contains("temporarily")
        }
        RetrievalError::ServiceError { code, .. } => *code >= 500,
        _ => false,
    }
}

#[async_trait]
impl ContextRetriever for HttpRetrievalClient {
    async fn search(
        &self,
        query: &str,
        country: &str,
        doc_type: &str,
    ) -> Result<RetrievalResult, RetrievalError> {
        let request = SearchRequest {
            query: query.to_string(),
            tag: index_tag(country, doc_type),
            k: SEARCH_K,
            search_type: "mmr".to_string(),
        };

        let response = self
            .retry
            .run("retrieval_search", is_transient_retrieval_error, || {
                self.execute_request(&request)
            })
            .await?;

        Ok(response.into_result())
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    query: String,
    tag: String,
    k: usize,
    search_type: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    documents: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    content: String,
    #[serde(default)]
    metadata: DocumentMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentMetadata {
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl SearchResponse {
    fn into_result(self) -> RetrievalResult {
        let documents: Vec<SearchDocument> = self
            .documents
            .into_iter()
            .filter(|d| !d.content.trim().is_empty())
            .take(MAX_CONTEXT_DOCUMENTS)
            .collect();

        if documents.is_empty() {
            return RetrievalResult::empty();
        }

        let context = documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        let references = documents
            .into_iter()
            .map(|d| Reference {
                title: d.metadata.document_type.unwrap_or_else(|| "Unknown".to_string()),
                country: d.metadata.country.unwrap_or_else(|| "Unknown".to_string()),
                tag: d.metadata.tag.unwrap_or_default(),
                updated_at: d.metadata.updated_at.unwrap_or_default(),
            })
            .collect();

        RetrievalResult {
            context,
            references,
        }
    }
}
