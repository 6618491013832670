//! The append-only record of per-message download outcomes.
//!
//! One JSON object per line in `download_log.jsonl` under the download
//! root. Lines are appended and flushed as messages finish and are never
//! rewritten, so an interrupted run leaves a valid log behind; the next run
//! loads it and skips everything already marked Success.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::DownloadError;

pub const LOG_FILE_NAME: &str = "download_log.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    Skipped,
    Error,
}

/// One entry per processed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub message_id: String,
    /// Absent when the message failed before a folder was derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_folder: Option<String>,
    pub attachment_files: Vec<String>,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DownloadRecord {
    pub fn success(
        message_id: impl Into<String>,
        folder: impl Into<String>,
        attachment_files: Vec<String>,
    ) -> Self {
        DownloadRecord {
            message_id: message_id.into(),
            destination_folder: Some(folder.into()),
            attachment_files,
            status: DownloadStatus::Success,
            error_detail: None,
        }
    }

    pub fn skipped(message_id: impl Into<String>) -> Self {
        DownloadRecord {
            message_id: message_id.into(),
            destination_folder: None,
            attachment_files: Vec::new(),
            status: DownloadStatus::Skipped,
            error_detail: None,
        }
    }

    pub fn error(
        message_id: impl Into<String>,
        folder: Option<String>,
        attachment_files: Vec<String>,
        detail: impl Into<String>,
    ) -> Self {
        DownloadRecord {
            message_id: message_id.into(),
            destination_folder: folder,
            attachment_files,
            status: DownloadStatus::Error,
            error_detail: Some(detail.into()),
        }
    }
}

/// Aggregate counts for one run, folded over its DownloadRecords.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub messages_processed: usize,
    pub attachments_saved: usize,
    pub errors: usize,
}

impl Summary {
    /// Skipped records count toward nothing; Error records count as
    /// processed, and any files written before the error still count as
    /// saved.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DownloadRecord>) -> Self {
        let mut summary = Summary::default();

        for record in records {
            match record.status {
                DownloadStatus::Skipped => {}
                DownloadStatus::Success => {
                    summary.messages_processed += 1;
                    summary.attachments_saved += record.attachment_files.len();
                }
                DownloadStatus::Error => {
                    summary.messages_processed += 1;
                    summary.errors += 1;
                    summary.attachments_saved += record.attachment_files.len();
                }
            }
        }

        summary
    }
}

/// The persisted log: an index of past outcomes plus an append handle.
pub struct DownloadLog {
    path: PathBuf,
    writer: File,
    index: HashMap<String, DownloadStatus>,
}

impl DownloadLog {
    /// Load (or create) the log under `root`. Prior entries are indexed by
    /// message id, latest status winning. A malformed line (typically the
    /// tail of a run that died mid-append) is skipped with a warning.
    pub fn open(root: &Path) -> Result<Self, DownloadError> {
        std::fs::create_dir_all(root).map_err(|e| DownloadError::write(root, e))?;

        let path = root.join(LOG_FILE_NAME);
        let mut index = HashMap::new();

        if path.exists() {
            let file = File::open(&path).map_err(|e| DownloadError::write(&path, e))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| DownloadError::write(&path, e))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DownloadRecord>(&line) {
                    Ok(record) => {
                        index.insert(record.message_id, record.status);
                    }
                    Err(e) => {
                        warn!("Skipping malformed download log line: {}", e);
                    }
                }
            }
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DownloadError::write(&path, e))?;

        Ok(DownloadLog {
            path,
            writer,
            index,
        })
    }

    /// Whether this message already completed successfully in some run.
    pub fn is_downloaded(&self, message_id: &str) -> bool {
        matches!(
            self.index.get(message_id),
            Some(DownloadStatus::Success)
        )
    }

    /// Append one record and flush it to disk before returning.
    pub fn append(&mut self, record: &DownloadRecord) -> Result<(), DownloadError> {
        let line = serde_json::to_string(record).map_err(|e| {
            DownloadError::write(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        writeln!(self.writer, "{}", line).map_err(|e| DownloadError::write(&self.path, e))?;
        self.writer
            .flush()
            .map_err(|e| DownloadError::write(&self.path, e))?;

        self.index
            .insert(record.message_id.clone(), record.status.clone());

        Ok(())
    }
}
