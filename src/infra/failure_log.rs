use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::app::ports::FailureLogPort;
use crate::constants::{FAILURE_LOG_COLUMNS, FAILURE_LOG_DATE_FORMAT};
use crate::metrics::FailureLogMetrics;
use crate::types::{CauseTag, RouteIdentity};

/// One row of the errored-messages file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub date: String,
    pub cause: String,
    pub organization: String,
    pub workspace: String,
    pub source: String,
    pub message: String,
}

impl FailureRecord {
    pub fn now(cause: CauseTag, payload: &str, route: &RouteIdentity) -> Self {
        Self {
            date: Local::now().format(FAILURE_LOG_DATE_FORMAT).to_string(),
            cause: cause.to_string(),
            organization: route.organization_id.clone(),
            workspace: route.workspace_id.clone(),
            source: route.source_id.clone(),
            message: payload.to_string(),
        }
    }
}

/// Append-only CSV log of failed produce calls.
///
/// Rows are appended, never rewritten. Appends from one process are serialized
/// through a mutex; separate processes must not share the file.
pub struct CsvFailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry`, writing the header first when the file is new or empty.
    /// Returns the file size after the write.
    pub async fn append(&self, entry: &FailureRecord) -> anyhow::Result<u64> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow::anyhow!("Failed to create failure log directory {:?}: {}", parent, e)
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open failure log {:?}: {}", self.path, e))?;

        let needs_header = file.metadata().await?.len() == 0;
        let bytes = render_row(entry, needs_header)?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        Ok(file.metadata().await?.len())
    }

    /// Data rows currently in the log; a missing file reads as empty.
    pub async fn read_entries(&self) -> anyhow::Result<Vec<FailureRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<FailureRecord>, csv::Error>>()?;
        Ok(entries)
    }
}

#[async_trait]
impl FailureLogPort for CsvFailureLog {
    async fn record(&self, cause: CauseTag, payload: &str, route: &RouteIdentity) {
        let entry = FailureRecord::now(cause, payload, route);
        match self.append(&entry).await {
            Ok(size) => {
                FailureLogMetrics::write_success();
                FailureLogMetrics::current_file_bytes(size);
                debug!(cause = %cause, path = ?self.path, "failure recorded");
            }
            Err(e) => {
                FailureLogMetrics::write_error();
                warn!(cause = %cause, path = ?self.path, error = %e, "could not write failure log");
            }
        }
    }
}

fn render_row(entry: &FailureRecord, with_header: bool) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(FAILURE_LOG_COLUMNS)?;
    }
    writer.serialize(entry)?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush failure row: {}", e.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn route() -> RouteIdentity {
        RouteIdentity::new("org-1", "ws-1", "src-1")
    }

    #[tokio::test]
    async fn test_missing_file_is_created_with_header() {
        let dir = TempDir::new().unwrap();
        let log = CsvFailureLog::new(dir.path().join("nested").join("errored_messages.csv"));

        log.record(CauseTag::Cipher, "[\"not-json\"]", &route()).await;

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("date,cause,organization,workspace,source,message")
        );
        let row = lines.next().unwrap();
        assert!(row.contains(",CIPHER,org-1,ws-1,src-1,"));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_failures_are_appended_in_order() {
        let dir = TempDir::new().unwrap();
        let log = CsvFailureLog::new(dir.path().join("errored_messages.csv"));

        log.record(CauseTag::Cipher, "first", &route()).await;
        log.record(CauseTag::Produce, "second", &route()).await;

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(content.lines().count(), 3);

        let entries = log.read_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].cause, "CIPHER");
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].cause, "PRODUCE");
        assert_eq!(entries[1].message, "second");
        assert!(entries[0].date <= entries[1].date);
    }

    #[tokio::test]
    async fn test_existing_entries_survive_a_new_logger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errored_messages.csv");

        CsvFailureLog::new(&path)
            .record(CauseTag::Cipher, "before restart", &route())
            .await;
        let log = CsvFailureLog::new(&path);
        log.record(CauseTag::Cipher, "after restart", &route()).await;

        let entries = log.read_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "before restart");
    }

    #[tokio::test]
    async fn test_payload_with_delimiters_is_quoted() {
        let dir = TempDir::new().unwrap();
        let log = CsvFailureLog::new(dir.path().join("errored_messages.csv"));
        let payload = "[\"{\\\"co2\\\": 1,\\n\\\"ts\\\": 2}\", \"a,b\"]";

        log.record(CauseTag::Produce, payload, &route()).await;

        let entries = log.read_entries().await.unwrap();
        assert_eq!(entries[0].message, payload);
    }

    #[tokio::test]
    async fn test_unwritable_path_does_not_fail_caller() {
        let dir = TempDir::new().unwrap();
        // a directory cannot be opened for appending
        let log = CsvFailureLog::new(dir.path());

        log.record(CauseTag::Cipher, "lost", &route()).await;

        assert!(log.read_entries().await.is_err());
    }

    #[tokio::test]
    async fn test_read_entries_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = CsvFailureLog::new(dir.path().join("absent.csv"));
        assert!(log.read_entries().await.unwrap().is_empty());
    }
}
