use chrono::NaiveDate;
use log::debug;

use crate::error::DownloadError;

/// A Gmail search expression over a calendar date range, plus an optional
/// free-text filter fragment (e.g. `from:billing@example.com filename:pdf`).
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub extra_filter: Option<String>,
}

impl SearchQuery {
    /// Parse and validate the date range before anything touches the network.
    pub fn parse(
        start: &str,
        end: &str,
        extra_filter: Option<&str>,
    ) -> Result<Self, DownloadError> {
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;

        if start_date > end_date {
            return Err(DownloadError::InvalidRange {
                start: start_date,
                end: end_date,
            });
        }

        let extra_filter = extra_filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from);

        Ok(SearchQuery {
            start_date,
            end_date,
            extra_filter,
        })
    }

    /// Serialize to the Gmail query string.
    ///
    /// Gmail expects `YYYY/MM/DD` dates, and treats `before:` as exclusive;
    /// the end date is passed through as-is.
    pub fn build(&self) -> String {
        let mut parts = vec![
            "has:attachment".to_string(),
            format!("after:{}", self.start_date.format("%Y/%m/%d")),
            format!("before:{}", self.end_date.format("%Y/%m/%d")),
        ];

        if let Some(extra) = &self.extra_filter {
            parts.push(extra.clone());
        }

        let query = parts.join(" ");
        debug!("Built search query: {}", query);
        query
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, DownloadError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| DownloadError::InvalidDateFormat(value.to_string()))
}
