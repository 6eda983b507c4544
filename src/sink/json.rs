//! JSON files next to the configured output path.
//!
//! - results: `<output>` (array of QA pairs)
//! - failures: `<output stem>_failed.<ext>`
//! - checkpoints: `<output>.backup_<completed>`, suffixed `_<k>` on collision

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::ResultSink;
use crate::error::SinkError;
use crate::pipeline::{CheckpointRecord, FailedJob, QaPair};

/// Collision suffixes tried before giving up on a checkpoint label.
const MAX_LABEL_ATTEMPTS: usize = 1000;

/// Writes run artifacts as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_path: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn failures_path(&self) -> PathBuf {
        failures_path(&self.output_path)
    }

    async fn ensure_parent(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SinkError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        Ok(())
    }
}

/// Checkpoint file for `completed` jobs, before collision handling.
pub fn checkpoint_path(output: &Path, completed: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".backup_{}", completed));
    PathBuf::from(name)
}

/// Failure log path derived from the results path.
pub fn failures_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "qa_pairs".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    output.with_file_name(format!("{}_failed.{}", stem, ext))
}

fn with_suffix(path: &Path, attempt: usize) -> PathBuf {
    if attempt == 0 {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(format!("_{}", attempt));
    PathBuf::from(name)
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SinkError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn write_checkpoint(&self, record: &CheckpointRecord) -> Result<String, SinkError> {
        self.ensure_parent().await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        let base = checkpoint_path(&self.output_path, record.completed_jobs);

        for attempt in 0..MAX_LABEL_ATTEMPTS {
            let path = with_suffix(&base, attempt);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    file.write_all(&bytes).await?;
                    file.sync_all().await?;
                    return Ok(path.display().to_string());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SinkError::Io(e)),
            }
        }

        Err(SinkError::CheckpointExists(base))
    }

    async fn write_results(&self, pairs: &[QaPair]) -> Result<(), SinkError> {
        self.ensure_parent().await?;
        write_json(&self.output_path, pairs).await?;
        tracing::info!(path = %self.output_path.display(), count = pairs.len(), "Results saved");
        Ok(())
    }

    async fn write_failures(&self, failures: &[FailedJob]) -> Result<(), SinkError> {
        self.ensure_parent().await?;
        let path = self.failures_path();
        write_json(&path, failures).await?;
        if !failures.is_empty() {
            tracing::info!(path = %path.display(), count = failures.len(), "Failed questions saved");
        }
        Ok(())
    }
}
