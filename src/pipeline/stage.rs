//! Per-question processing: cache lookup, retrieval, generation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::cache::{AnswerCache, CacheEntry, Signature};
use super::job::{truncate_chars, Job, JobResult};
use crate::error::{LlmError, RetrievalError};
use crate::llm::AnswerGenerator;
use crate::retrieval::{doc_type_for, normalize_country, normalize_topic, ContextRetriever};

/// Job-level failure. Converted into a failed [`JobResult`], never propagated.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),
}

/// Turns one [`Job`] into a [`JobResult`].
///
/// Cloning is cheap; all collaborators are shared.
#[derive(Clone)]
pub struct JobStage {
    retriever: Arc<dyn ContextRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    cache: Arc<AnswerCache>,
    context_char_limit: usize,
    job_timeout: Duration,
}

impl JobStage {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        generator: Arc<dyn AnswerGenerator>,
        cache: Arc<AnswerCache>,
        context_char_limit: usize,
        job_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            generator,
            cache,
            context_char_limit,
            job_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<AnswerCache> {
        &self.cache
    }

    /// Processes a job. Every job-level error becomes a `Failed` result.
    pub async fn process(&self, job: Job) -> JobResult {
        let country = normalize_country(&job.country);
        let topic = normalize_topic(&job.topic);
        let signature = Signature::compute(&country, &topic, &job.question);

        let lookup = self
            .cache
            .resolve(&signature, || self.resolve_uncached(&job, &country, &topic));

        let outcome = match tokio::time::timeout(self.job_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(self.job_timeout)),
        };

        match outcome {
            Ok((entry, hit)) => {
                if hit {
                    tracing::debug!(job_id = %job.id, signature = %signature, "Cache hit");
                }
                let result = JobResult::success(job, entry.answer, entry.context);
                if hit {
                    result.from_cache()
                } else {
                    result
                }
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %job.id,
                    country = %job.country,
                    topic = %job.topic,
                    error = %err,
                    "Job failed"
                );
                JobResult::failed(job, err.to_string())
            }
        }
    }

    /// `country` and `topic` are already normalized; the cache key was built
    /// from the same pair.
    async fn resolve_uncached(
        &self,
        job: &Job,
        country: &str,
        topic: &str,
    ) -> Result<CacheEntry, StageError> {
        let doc_type = doc_type_for(topic);

        let retrieved = self
            .retriever
            .search(&job.question, country, &doc_type)
            .await?;

        if retrieved.is_empty() {
            tracing::info!(
                job_id = %job.id,
                country = %country,
                doc_type = %doc_type,
                "No context found, answering without retrieval"
            );
        }

        let answer = self
            .generator
            .generate(&job.question, &retrieved.context, &retrieved.references)
            .await?;

        Ok(CacheEntry {
            answer,
            context: truncate_chars(&retrieved.context, self.context_char_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::JobStatus;
    use crate::retrieval::{Reference, RetrievalResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRetriever {
        calls: Mutex<Vec<(String, String, String)>>,
        context: String,
        fail: bool,
    }

    #[async_trait]
    impl ContextRetriever for FakeRetriever {
        async fn search(
            &self,
            query: &str,
            country: &str,
            doc_type: &str,
        ) -> Result<RetrievalResult, RetrievalError> {
            self.calls.lock().expect("lock").push((
                query.to_string(),
                country.to_string(),
                doc_type.to_string(),
            ));
            if self.fail {
                return Err(RetrievalError::ServiceError {
                    code: 500,
                    message: "index offline".to_string(),
                });
            }
            if self.context.is_empty() {
                return Ok(RetrievalResult::empty());
            }
            Ok(RetrievalResult {
                context: self.context.clone(),
                references: vec![Reference {
                    title: "visa_info".to_string(),
                    country: country.to_string(),
                    tag: format!("{}_{}", country, doc_type),
                    updated_at: String::new(),
                }],
            })
        }
    }

    struct EchoGenerator {
        delay: Duration,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(
            &self,
            query: &str,
            context: &str,
            _references: &[Reference],
        ) -> Result<String, LlmError> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("{} [{}]", query, context.len()))
        }
    }

    fn stage(retriever: Arc<FakeRetriever>, limit: usize, timeout: Duration) -> JobStage {
        JobStage::new(
            retriever,
            Arc::new(EchoGenerator {
                delay: Duration::from_millis(0),
            }),
            Arc::new(AnswerCache::new()),
            limit,
            timeout,
        )
    }

    #[tokio::test]
    async fn test_canonical_doc_type_and_lowercase_country() {
        let retriever = Arc::new(FakeRetriever {
            context: "ctx".to_string(),
            ..Default::default()
        });
        let stage = stage(retriever.clone(), 1000, Duration::from_secs(5));

        let result = stage
            .process(Job::new("1", "Japan", "immigration", "Entry rules?"))
            .await;
        assert_eq!(result.status, JobStatus::Success);

        let calls = retriever.calls.lock().expect("lock");
        assert_eq!(
            calls[0],
            (
                "Entry rules?".to_string(),
                "japan".to_string(),
                "immigration_regulations_info".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_padded_country_and_alias_topic_normalized_for_search() {
        let retriever = Arc::new(FakeRetriever {
            context: "ctx".to_string(),
            ..Default::default()
        });
        let stage = stage(retriever.clone(), 1000, Duration::from_secs(5));

        let result = stage
            .process(Job::new("1", " Japan ", "Safety", "Is it safe?"))
            .await;
        assert_eq!(result.status, JobStatus::Success);

        let calls = retriever.calls.lock().expect("lock");
        assert_eq!(calls[0].1, "japan");
        assert_eq!(calls[0].2, "immigration_safety_info");
    }

    #[tokio::test]
    async fn test_cache_key_and_search_agree_on_normalization() {
        let retriever = Arc::new(FakeRetriever {
            context: "ctx".to_string(),
            ..Default::default()
        });
        let stage = stage(retriever.clone(), 1000, Duration::from_secs(5));

        let first = stage.process(Job::new("1", " Japan ", "Safety", "q")).await;
        let second = stage
            .process(Job::new("2", "japan", "immigration_safety", "q"))
            .await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.answer, second.answer);
        let calls = retriever.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            (calls[0].1.as_str(), calls[0].2.as_str()),
            ("japan", "immigration_safety_info")
        );
    }

    #[tokio::test]
    async fn test_context_truncated() {
        let retriever = Arc::new(FakeRetriever {
            context: "x".repeat(50),
            ..Default::default()
        });
        let stage = stage(retriever, 10, Duration::from_secs(5));

        let result = stage.process(Job::new("1", "japan", "visa", "q")).await;
        assert_eq!(result.context.as_deref(), Some("xxxxxxxxxx"));
        // generator still saw the full context
        assert_eq!(result.answer.as_deref(), Some("q [50]"));
    }

    #[tokio::test]
    async fn test_empty_context_is_success() {
        let retriever = Arc::new(FakeRetriever::default());
        let stage = stage(retriever, 1000, Duration::from_secs(5));

        let result = stage.process(Job::new("1", "japan", "visa", "q")).await;
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.context.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_retrieval_error_becomes_failed_result() {
        let retriever = Arc::new(FakeRetriever {
            fail: true,
            ..Default::default()
        });
        let stage = stage(retriever, 1000, Duration::from_secs(5));

        let result = stage.process(Job::new("7", "japan", "visa", "q")).await;
        assert_eq!(result.status, JobStatus::Failed);
        let error = result.error.expect("error text");
        assert!(error.contains("index offline"));
        assert!(stage.cache().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_served_from_cache() {
        let retriever = Arc::new(FakeRetriever {
            context: "ctx".to_string(),
            ..Default::default()
        });
        let stage = stage(retriever.clone(), 1000, Duration::from_secs(5));

        let first = stage.process(Job::new("1", "japan", "visa", "q")).await;
        let second = stage.process(Job::new("2", "Japan", "visa", "  q ")).await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.answer, second.answer);
        assert_eq!(second.job.id, "2");
        assert_eq!(retriever.calls.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_job_timeout() {
        let retriever = Arc::new(FakeRetriever {
            context: "ctx".to_string(),
            ..Default::default()
        });
        let stage = JobStage::new(
            retriever,
            Arc::new(EchoGenerator {
                delay: Duration::from_millis(200),
            }),
            Arc::new(AnswerCache::new()),
            1000,
            Duration::from_millis(20),
        );

        let result = stage.process(Job::new("1", "japan", "visa", "q")).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.expect("error").contains("timed out"));
        assert!(stage.cache().is_empty());
    }
}
