//! Question sources.
//!
//! A [`QuestionSource`] yields the records the pipeline turns into jobs.
//! [`JsonQuestionFile`] reads the question generator's JSON export;
//! [`SqliteQuestionSource`] reads a `questions` table.

pub mod sqlite;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SourceError;

pub use sqlite::SqliteQuestionSource;

/// One generated question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub country: String,
    pub topic: String,
    pub question: String,
}

impl QuestionRecord {
    fn validate(&self, index: usize) -> Result<(), SourceError> {
        let missing = [
            ("id", &self.id),
            ("country", &self.country),
            ("topic", &self.topic),
            ("question", &self.question),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(SourceError::InvalidRecord {
                index,
                reason: format!("empty {}", field),
            }),
            None => Ok(()),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Question Source interface consumed by the pipeline.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Loads every question, in source order.
    async fn load(&self) -> Result<Vec<QuestionRecord>, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Accepted layouts of a questions file.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuestionDocument {
    Wrapped { questions: Vec<QuestionRecord> },
    Bare(Vec<QuestionRecord>),
}

/// JSON questions file: `{"questions": [...]}` or a bare array.
///
/// Extra top-level keys (such as `metadata`) are ignored.
#[derive(Debug, Clone)]
pub struct JsonQuestionFile {
    path: PathBuf,
}

impl JsonQuestionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses questions from JSON text.
    pub fn parse(raw: &str) -> Result<Vec<QuestionRecord>, SourceError> {
        let records = match serde_json::from_str::<QuestionDocument>(raw)? {
            QuestionDocument::Wrapped { questions } => questions,
            QuestionDocument::Bare(questions) => questions,
        };
        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        Ok(records)
    }
}

#[async_trait]
impl QuestionSource for JsonQuestionFile {
    async fn load(&self) -> Result<Vec<QuestionRecord>, SourceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&raw)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory questions.
#[derive(Debug, Clone, Default)]
pub struct StaticQuestions(pub Vec<QuestionRecord>);

#[async_trait]
impl QuestionSource for StaticQuestions {
    async fn load(&self) -> Result<Vec<QuestionRecord>, SourceError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory questions", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_document() {
        let raw = r#"{
            "metadata": {"total_questions": 2},
            "questions": [
                {"id": "a1", "topic": "visa", "question": "Do I need a visa?", "country": "France"},
                {"id": 7, "topic": "safety", "question": "Is it safe at night?", "country": "Japan"}
            ]
        }"#;
        let records = JsonQuestionFile::parse(raw).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a1");
        assert_eq!(records[1].id, "7");
        assert_eq!(records[1].topic, "safety");
    }

    #[test]
    fn test_parse_bare_array() {
        let raw = r#"[{"id": "x", "country": "Korea", "topic": "insurance", "question": "Q?"}]"#;
        let records = JsonQuestionFile::parse(raw).expect("parse");
        assert_eq!(records[0].country, "Korea");
    }

    #[test]
    fn test_parse_rejects_blank_fields() {
        let raw = r#"[{"id": "x", "country": "Korea", "topic": "insurance", "question": "  "}]"#;
        let err = JsonQuestionFile::parse(raw).unwrap_err();
        assert!(matches!(err, SourceError::InvalidRecord { index: 0, .. }));
        assert!(err.to_string().contains("question"));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let raw = r#"[{"id": "x", "country": "Korea"}]"#;
        assert!(JsonQuestionFile::parse(raw).is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let source = JsonQuestionFile::new("/nonexistent/questions.json");
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("questions.json");
        std::fs::write(
            &path,
            r#"{"questions": [{"id": "1", "country": "Spain", "topic": "visa", "question": "Q?"}]}"#,
        )
        .expect("write");

        let records = JsonQuestionFile::new(&path).load().await.expect("load");
        assert_eq!(records.len(), 1);
        assert!(JsonQuestionFile::new(&path).describe().ends_with("questions.json"));
    }
}
