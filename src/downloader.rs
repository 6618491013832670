use log::{debug, error, info, warn};
use std::path::PathBuf;

use crate::config::RetryConfig;
use crate::download_log::{DownloadLog, DownloadRecord, DownloadStatus, Summary};
use crate::error::DownloadError;
use crate::extractor;
use crate::paginator::MessagePaginator;
use crate::provider::MailProvider;
use crate::query::SearchQuery;
use crate::storage::StorageWriter;

/// Per-run options, supplied by the CLI layer.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub query: SearchQuery,
    pub page_size: u32,
    /// Cap on the number of messages actually downloaded (skips not counted).
    pub limit: Option<usize>,
    /// Analyze without writing files or log entries.
    pub dry_run: bool,
}

/// The orchestrator: paginate the search, then extract, write and log each
/// message, one at a time in pagination order.
pub struct Downloader<'a> {
    provider: &'a dyn MailProvider,
    storage: StorageWriter,
    log: DownloadLog,
    retry: RetryConfig,
}

impl<'a> Downloader<'a> {
    pub fn new(
        provider: &'a dyn MailProvider,
        download_root: impl Into<PathBuf>,
        retry: RetryConfig,
    ) -> Result<Self, DownloadError> {
        let root: PathBuf = download_root.into();
        let log = DownloadLog::open(&root)?;

        Ok(Downloader {
            provider,
            storage: StorageWriter::new(root),
            log,
            retry,
        })
    }

    /// Run the pipeline to completion and fold the run's records into a
    /// summary.
    ///
    /// Per-message and per-attachment failures become Error entries in the
    /// log and never abort the run; only quota exhaustion does, with
    /// everything processed so far already flushed to the log.
    pub async fn run(&mut self, options: &RunOptions) -> Result<Summary, DownloadError> {
        let query = options.query.build();
        info!("🔍 Search query: {}", query);

        if options.dry_run {
            println!("\n{}", "=".repeat(80));
            println!("🧪 MODE DRY-RUN - ATTACHMENT ANALYSIS");
            println!("{}", "=".repeat(80));
        }

        let mut paginator =
            MessagePaginator::new(self.provider, query, options.page_size, self.retry.clone());
        let mut records: Vec<DownloadRecord> = Vec::new();
        let mut attempted = 0usize;

        while let Some(message_id) = paginator.next_id().await? {
            if let Some(limit) = options.limit {
                if attempted >= limit {
                    info!("Limit of {} message(s) reached, stopping", limit);
                    break;
                }
            }

            if self.log.is_downloaded(&message_id) {
                debug!("⏭️  Message {} already downloaded, skipping", message_id);
                let record = DownloadRecord::skipped(&message_id);
                self.commit(record, options.dry_run, &mut records)?;
                continue;
            }

            attempted += 1;
            let record = self.process_message(&message_id, options.dry_run).await;
            self.commit(record, options.dry_run, &mut records)?;
        }

        let summary = Summary::from_records(&records);

        if options.dry_run {
            println!("{}", "=".repeat(80));
            println!(
                "🏁 Analysis completed: {} message(s), {} attachment(s), {} error(s)",
                summary.messages_processed, summary.attachments_saved, summary.errors
            );
            println!("{}", "=".repeat(80));
        } else {
            info!(
                "Processing completed: {} message(s) processed, {} attachment(s) saved, {} error(s)",
                summary.messages_processed, summary.attachments_saved, summary.errors
            );
        }

        Ok(summary)
    }

    /// Process one message end to end, turning every failure into an Error
    /// record rather than a run abort.
    async fn process_message(&self, message_id: &str, dry_run: bool) -> DownloadRecord {
        let (meta, attachments) =
            match extractor::fetch_message_attachments(self.provider, message_id).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("❌ {}", e);
                    return DownloadRecord::error(message_id, None, Vec::new(), e.to_string());
                }
            };

        info!(
            "📧 Message {}: '{}' ({}, {} attachment(s))",
            meta.id,
            meta.subject,
            meta.internal_date.format("%Y-%m-%d"),
            attachments.len()
        );

        if attachments.is_empty() {
            warn!("⚠️  No attachments found in message {}", meta.id);
            return DownloadRecord {
                message_id: meta.id,
                destination_folder: None,
                attachment_files: Vec::new(),
                status: DownloadStatus::Success,
                error_detail: None,
            };
        }

        if dry_run {
            for attachment in &attachments {
                println!(
                    "📎 {} ({}, {} bytes)",
                    attachment.filename, attachment.mime_type, attachment.size_bytes
                );
            }
            let files = attachments.iter().map(|a| a.filename.clone()).collect();
            return DownloadRecord::success(&meta.id, self.storage.folder_name(&meta), files);
        }

        match self.storage.write_attachments(&meta, &attachments) {
            Ok(outcome) if outcome.failures.is_empty() => {
                DownloadRecord::success(&meta.id, outcome.folder, outcome.saved)
            }
            Ok(outcome) => {
                error!(
                    "❌ {} attachment(s) failed for message {}",
                    outcome.failures.len(),
                    meta.id
                );
                DownloadRecord::error(
                    &meta.id,
                    Some(outcome.folder),
                    outcome.saved,
                    outcome.failures.join("; "),
                )
            }
            Err(e) => {
                error!("❌ Unable to prepare folder for message {}: {}", meta.id, e);
                DownloadRecord::error(&meta.id, None, Vec::new(), e.to_string())
            }
        }
    }

    fn commit(
        &mut self,
        record: DownloadRecord,
        dry_run: bool,
        records: &mut Vec<DownloadRecord>,
    ) -> Result<(), DownloadError> {
        if !dry_run {
            self.log.append(&record)?;
        }
        records.push(record);
        Ok(())
    }
}
