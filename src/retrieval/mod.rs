//! Context retrieval for answer grounding.
//!
//! The pipeline looks up supporting passages for each question through the
//! [`ContextRetriever`] interface before asking the LLM for an answer.
//! [`HttpRetrievalClient`] talks to an external vector-search service.
//!
//! Documents are tagged `<country>_<doc_type>` in the index, where
//! `doc_type` is the canonical topic with an `_info` suffix
//! (see [`doc_type_for`]).

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

pub use http::HttpRetrievalClient;

/// Separator placed between retrieved passages in the joined context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Metadata about one document that contributed to a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub country: String,
    pub tag: String,
    pub updated_at: String,
}

/// Outcome of a retrieval lookup.
///
/// An empty `context` means no document matched; that is a valid result,
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub context: String,
    pub references: Vec<Reference>,
}

impl RetrievalResult {
    /// A result with no matching documents.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether any context was found.
    pub fn is_empty(&self) -> bool {
        self.context.trim().is_empty()
    }
}

/// Retrieval Client interface consumed by the pipeline.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Search for context relevant to `query`, restricted to documents of
    /// `doc_type` for `country`.
    async fn search(
        &self,
        query: &str,
        country: &str,
        doc_type: &str,
    ) -> Result<RetrievalResult, RetrievalError>;
}

/// Maps question topics onto the topic names used by the document index.
///
/// `immigration` and `safety` questions are answered from the immigration
/// regulation and immigration safety documents; every other topic is used
/// as-is.
pub fn canonical_topic(topic: &str) -> &str {
    match topic {
        "immigration" => "immigration_regulations",
        "safety" => "immigration_safety",
        other => other,
    }
}

/// Country as it appears in index tags: trimmed and lowercased.
pub fn normalize_country(country: &str) -> String {
    country.trim().to_lowercase()
}

/// Topic as it appears in index tags: trimmed, lowercased and mapped through
/// [`canonical_topic`]. Idempotent.
pub fn normalize_topic(topic: &str) -> String {
    canonical_topic(&topic.trim().to_lowercase()).to_string()
}

/// Document type searched for a question topic, e.g. `visa` → `visa_info`.
pub fn doc_type_for(topic: &str) -> String {
    format!("{}_info", normalize_topic(topic))
}

/// Index tag for a country/doc type pair, e.g. `france_visa_info`.
pub fn index_tag(country: &str, doc_type: &str) -> String {
    if doc_type.is_empty() {
        country.to_string()
    } else {
        format!("{}_{}", country, doc_type)
    }
}
