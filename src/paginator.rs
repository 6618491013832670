use log::{debug, warn};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::DownloadError;
use crate::provider::{MailProvider, MessagePage};

/// Longest delay the backoff is allowed to reach.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Lazily walks the paginated search results for one query.
///
/// Pages are fetched on demand and buffered one at a time; iteration ends
/// when the provider stops returning a continuation token. A paginator is
/// not restartable mid-stream: dropping it and creating a new one re-runs
/// the search from the beginning.
pub struct MessagePaginator<'a> {
    provider: &'a dyn MailProvider,
    query: String,
    page_size: u32,
    retry: RetryConfig,
    next_page_token: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl<'a> MessagePaginator<'a> {
    pub fn new(
        provider: &'a dyn MailProvider,
        query: impl Into<String>,
        page_size: u32,
        retry: RetryConfig,
    ) -> Self {
        MessagePaginator {
            provider,
            query: query.into(),
            page_size,
            retry,
            next_page_token: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The next matching message id, or `None` once the search is drained.
    ///
    /// Rate-limited page requests are retried with exponential backoff up to
    /// `retry.max_retries` times before `QuotaExceeded` surfaces; any other
    /// provider error propagates immediately.
    pub async fn next_id(&mut self) -> Result<Option<String>, DownloadError> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Ok(Some(id));
            }

            if self.exhausted {
                return Ok(None);
            }

            let page = self.fetch_page_with_backoff().await?;
            debug!(
                "Fetched page with {} id(s), more: {}",
                page.ids.len(),
                page.next_page_token.is_some()
            );

            self.buffer.extend(page.ids);
            match page.next_page_token {
                Some(token) => self.next_page_token = Some(token),
                None => self.exhausted = true,
            }
        }
    }

    async fn fetch_page_with_backoff(&self) -> Result<MessagePage, DownloadError> {
        let mut attempt: u32 = 0;

        loop {
            let result = self
                .provider
                .list_messages(&self.query, self.next_page_token.as_deref(), self.page_size)
                .await;

            match result {
                Ok(page) => return Ok(page),
                Err(DownloadError::RateLimited(reason)) => {
                    if attempt >= self.retry.max_retries {
                        return Err(DownloadError::QuotaExceeded { attempts: attempt, reason });
                    }
                    let delay = backoff_delay(self.retry.base_delay_ms, attempt);
                    warn!(
                        "⏳ Rate limited ({}), retrying in {:?} (retry {}/{})",
                        reason,
                        delay,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

/// Exponential delay for the given zero-based attempt, capped at one minute.
fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}
