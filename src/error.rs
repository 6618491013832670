//! Centralized error types for the download pipeline.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailstash core.
///
/// Only `InvalidDateFormat`, `InvalidRange` and `QuotaExceeded` are fatal for
/// a run. `Fetch` and `Write` are scoped to a single message or attachment
/// and end up as Error entries in the download log.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// A date argument did not parse as a calendar date.
    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDateFormat(String),

    /// The start date is after the end date.
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// The provider rejected a request because of rate limiting.
    /// Retried with backoff by the paginator before becoming `QuotaExceeded`.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// Rate-limit retries were exhausted; the run stops, the log keeps
    /// everything processed so far.
    #[error("quota exceeded after {attempts} retries: {reason}")]
    QuotaExceeded { attempts: u32, reason: String },

    /// A non-quota provider failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Fetching one message failed; the run continues with the next one.
    #[error("failed to fetch message {message_id}: {reason}")]
    Fetch { message_id: String, reason: String },

    /// Writing one attachment (or the log itself) failed.
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Helper to wrap an I/O error together with the path it happened on.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Write {
            path: path.into(),
            source,
        }
    }
}
