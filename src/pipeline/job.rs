//! Jobs and their outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::QuestionRecord;

/// One question awaiting context retrieval and answer generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub country: String,
    pub topic: String,
    pub question: String,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        country: impl Into<String>,
        topic: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            country: country.into(),
            topic: topic.into(),
            question: question.into(),
        }
    }
}

impl From<QuestionRecord> for Job {
    fn from(record: QuestionRecord) -> Self {
        Self {
            id: record.id,
            country: record.country,
            topic: record.topic,
            question: record.question,
        }
    }
}

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of processing a single [`Job`].
///
/// A `Success` carries `answer` and `context`; a `Failed` carries `error`.
/// Use the constructors to keep that pairing intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the answer was served from the run cache.
    #[serde(skip)]
    pub cached: bool,
}

impl JobResult {
    /// Successful outcome. `context` is stored as given; callers truncate it.
    pub fn success(job: Job, answer: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            job,
            status: JobStatus::Success,
            answer: Some(answer.into()),
            context: Some(context.into()),
            error: None,
            cached: false,
        }
    }

    /// Failed outcome carrying the triggering error text.
    pub fn failed(job: Job, error: impl Into<String>) -> Self {
        Self {
            job,
            status: JobStatus::Failed,
            answer: None,
            context: None,
            error: Some(error.into()),
            cached: false,
        }
    }

    /// Marks the result as served from cache.
    pub fn from_cache(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Training-ready record for a successful result.
    pub fn to_qa_pair(&self) -> Option<QaPair> {
        match (&self.status, &self.answer) {
            (JobStatus::Success, Some(answer)) => Some(QaPair {
                id: self.job.id.clone(),
                country: self.job.country.clone(),
                topic: self.job.topic.clone(),
                question: self.job.question.clone(),
                answer: answer.clone(),
                context: self.context.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    /// Failure-log record for a failed result.
    pub fn to_failed_job(&self) -> Option<FailedJob> {
        if self.status != JobStatus::Failed {
            return None;
        }
        Some(FailedJob {
            question_id: self.job.id.clone(),
            country: self.job.country.clone(),
            topic: self.job.topic.clone(),
            question: self.job.question.clone(),
            error: self.error.clone().unwrap_or_default(),
        })
    }
}

/// A question/answer/context triple ready for fine-tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub id: String,
    pub country: String,
    pub topic: String,
    pub question: String,
    pub answer: String,
    pub context: String,
}

/// Entry of the failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub question_id: String,
    pub country: String,
    pub topic: String,
    pub question: String,
    pub error: String,
}

/// Truncates `text` to at most `limit` characters, never splitting a char.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
