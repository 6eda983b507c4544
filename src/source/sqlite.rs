//! SQLite-backed question source.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{QuestionRecord, QuestionSource};
use crate::error::SourceError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id          TEXT NOT NULL PRIMARY KEY,
    country     TEXT NOT NULL,
    topic       TEXT NOT NULL,
    question    TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_questions_country_topic ON questions(country, topic);
"#;

/// Reads questions from a `questions(id, country, topic, question)` table,
/// in insertion order.
#[derive(Clone)]
pub struct SqliteQuestionSource {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteQuestionSource {
    /// Opens an existing database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }
        Self::connect(path, false).await
    }

    /// Opens or creates a database and ensures the table exists.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let source = Self::connect(path.as_ref(), true).await?;
        sqlx::query(SCHEMA_SQL).execute(&source.pool).await?;
        Ok(source)
    }

    async fn connect(path: &Path, create: bool) -> Result<Self, SourceError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await?;

        tracing::debug!(path = %path.display(), "Question database opened");
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Inserts questions, replacing rows with the same id.
    pub async fn insert(&self, records: &[QuestionRecord]) -> Result<(), SourceError> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                "INSERT INTO questions (id, country, topic, question) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    country = excluded.country,
                    topic = excluded.topic,
                    question = excluded.question",
            )
            .bind(&r.id)
            .bind(&r.country)
            .bind(&r.topic)
            .bind(&r.question)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, SourceError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM questions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }
}

#[async_trait]
impl QuestionSource for SqliteQuestionSource {
    async fn load(&self) -> Result<Vec<QuestionRecord>, SourceError> {
        let rows = sqlx::query(
            "SELECT CAST(id AS TEXT) AS id, country, topic, question
             FROM questions ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let record = QuestionRecord {
                id: row.get("id"),
                country: row.get("country"),
                topic: row.get("topic"),
                question: row.get("question"),
            };
            record.validate(index)?;
            records.push(record);
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}
