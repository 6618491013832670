use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use mailstash::config::RetryConfig;
use mailstash::download_log::{Summary, LOG_FILE_NAME};
use mailstash::downloader::{Downloader, RunOptions};
use mailstash::error::DownloadError;
use mailstash::provider::{FetchedMessage, MailProvider, MessagePage, MessagePart, MessageRef};
use mailstash::query::SearchQuery;

/// In-memory provider: fixed pages of ids, canned messages, optional
/// simulated failures.
struct MockProvider {
    pages: Vec<Vec<String>>,
    messages: HashMap<String, FetchedMessage>,
    failing_fetches: Vec<String>,
    rate_limited_page: Option<usize>,
    list_calls: Mutex<Vec<Option<String>>>,
}

impl MockProvider {
    fn new(pages: Vec<Vec<&str>>) -> Self {
        MockProvider {
            pages: pages
                .into_iter()
                .map(|page| page.into_iter().map(String::from).collect())
                .collect(),
            messages: HashMap::new(),
            failing_fetches: Vec::new(),
            rate_limited_page: None,
            list_calls: Mutex::new(Vec::new()),
        }
    }

    fn add_message(
        &mut self,
        id: &str,
        subject: &str,
        day: u32,
        attachments: Vec<(&str, &str, &[u8])>,
    ) {
        let mut parts = vec![MessagePart::Leaf {
            filename: None,
            mime_type: "text/plain".to_string(),
            payload: b"message body".to_vec(),
        }];
        for (filename, mime_type, payload) in attachments {
            parts.push(MessagePart::Leaf {
                filename: Some(filename.to_string()),
                mime_type: mime_type.to_string(),
                payload: payload.to_vec(),
            });
        }

        self.messages.insert(
            id.to_string(),
            FetchedMessage {
                meta: MessageRef {
                    id: id.to_string(),
                    internal_date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
                    subject: subject.to_string(),
                },
                body: MessagePart::Container { parts },
            },
        );
    }

    fn list_calls_for(&self, token: Option<&str>) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_deref() == token)
            .count()
    }
}

fn page_index(token: Option<&str>) -> usize {
    match token {
        None => 0,
        Some(t) => t
            .trim_start_matches("page-")
            .parse()
            .expect("mock page token"),
    }
}

impl MailProvider for MockProvider {
    fn list_messages<'a>(
        &'a self,
        _query: &'a str,
        page_token: Option<&'a str>,
        _page_size: u32,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<MessagePage, DownloadError>> + Send + 'a>,
    > {
        Box::pin(async move {
            self.list_calls
                .lock()
                .unwrap()
                .push(page_token.map(String::from));

            let index = page_index(page_token);
            if Some(index) == self.rate_limited_page {
                return Err(DownloadError::RateLimited("simulated rate limit".into()));
            }

            let ids = self.pages.get(index).cloned().unwrap_or_default();
            let next_page_token = if index + 1 < self.pages.len() {
                Some(format!("page-{}", index + 1))
            } else {
                None
            };

            Ok(MessagePage {
                ids,
                next_page_token,
            })
        })
    }

    fn get_message<'a>(
        &'a self,
        message_id: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<FetchedMessage, DownloadError>> + Send + 'a>,
    > {
        Box::pin(async move {
            if self.failing_fetches.iter().any(|id| id == message_id) {
                return Err(DownloadError::Provider("simulated fetch failure".into()));
            }
            self.messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| DownloadError::Provider(format!("unknown message {}", message_id)))
        })
    }
}

fn retry_fast() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
    }
}

fn options(limit: Option<usize>, dry_run: bool) -> RunOptions {
    RunOptions {
        query: SearchQuery::parse("2024-01-01", "2024-01-31", Some("filename:pdf"))
            .expect("valid query"),
        page_size: 100,
        limit,
        dry_run,
    }
}

async fn run(provider: &MockProvider, root: &Path, opts: &RunOptions) -> Result<Summary, DownloadError> {
    let mut downloader = Downloader::new(provider, root, retry_fast()).expect("downloader");
    downloader.run(opts).await
}

fn log_entries(root: &Path) -> Vec<serde_json::Value> {
    let content = fs::read_to_string(root.join(LOG_FILE_NAME)).expect("read download log");
    content
        .lines()
        .map(|line| serde_json::from_str(line).expect("log line is JSON"))
        .collect()
}

fn message_folders(root: &Path) -> Vec<String> {
    let mut folders: Vec<String> = fs::read_dir(root)
        .expect("read download root")
        .map(|e| e.expect("entry"))
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    folders.sort();
    folders
}

#[tokio::test]
async fn test_two_messages_one_pdf_each() {
    let mut provider = MockProvider::new(vec![vec!["msg-aaaa0001", "msg-bbbb0002"]]);
    provider.add_message(
        "msg-aaaa0001",
        "Invoice January",
        10,
        vec![("invoice.pdf", "application/pdf", b"%PDF-1.4 one")],
    );
    provider.add_message(
        "msg-bbbb0002",
        "Receipt",
        20,
        vec![("receipt.pdf", "application/pdf", b"%PDF-1.4 two")],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("run");

    assert_eq!(
        summary,
        Summary {
            messages_processed: 2,
            attachments_saved: 2,
            errors: 0,
        }
    );

    let folders = message_folders(dir.path());
    assert_eq!(folders.len(), 2, "folders: {:?}", folders);
    assert_eq!(
        folders,
        vec![
            "2024-01-10_Invoice January_aaaa0001",
            "2024-01-20_Receipt_bbbb0002"
        ]
    );
    assert!(dir
        .path()
        .join("2024-01-10_Invoice January_aaaa0001/invoice.pdf")
        .exists());
    assert!(dir
        .path()
        .join("2024-01-20_Receipt_bbbb0002/receipt.pdf")
        .exists());

    let entries = log_entries(dir.path());
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["status"] == "success"));
}

#[tokio::test]
async fn test_rerun_skips_downloaded_messages() {
    let mut provider = MockProvider::new(vec![vec!["msg-aaaa0001", "msg-bbbb0002"]]);
    provider.add_message(
        "msg-aaaa0001",
        "Invoice January",
        10,
        vec![("invoice.pdf", "application/pdf", b"%PDF-1.4 one")],
    );
    provider.add_message(
        "msg-bbbb0002",
        "Receipt",
        20,
        vec![("receipt.pdf", "application/pdf", b"%PDF-1.4 two")],
    );

    let dir = tempfile::tempdir().expect("tempdir");

    let first = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("first run");
    assert_eq!(first.messages_processed, 2);

    let second = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("second run");
    assert_eq!(
        second,
        Summary {
            messages_processed: 0,
            attachments_saved: 0,
            errors: 0,
        }
    );

    // No duplicate Success entries per message id
    let entries = log_entries(dir.path());
    for id in ["msg-aaaa0001", "msg-bbbb0002"] {
        let successes = entries
            .iter()
            .filter(|e| e["message_id"] == id && e["status"] == "success")
            .count();
        assert_eq!(successes, 1, "message {} downloaded twice", id);

        let skips = entries
            .iter()
            .filter(|e| e["message_id"] == id && e["status"] == "skipped")
            .count();
        assert_eq!(skips, 1, "message {} should be skipped once", id);
    }
}

#[tokio::test]
async fn test_fetch_failure_does_not_abort_the_run() {
    let mut provider = MockProvider::new(vec![vec!["msg-broken01", "msg-bbbb0002"]]);
    provider.add_message(
        "msg-bbbb0002",
        "Receipt",
        20,
        vec![("receipt.pdf", "application/pdf", b"%PDF-1.4 two")],
    );
    provider.failing_fetches.push("msg-broken01".to_string());

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("run survives one bad message");

    assert_eq!(
        summary,
        Summary {
            messages_processed: 2,
            attachments_saved: 1,
            errors: 1,
        }
    );

    // The healthy message still landed on disk
    assert!(dir
        .path()
        .join("2024-01-20_Receipt_bbbb0002/receipt.pdf")
        .exists());

    let entries = log_entries(dir.path());
    let broken: Vec<_> = entries
        .iter()
        .filter(|e| e["message_id"] == "msg-broken01")
        .collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0]["status"], "error");
    assert!(broken[0]["error_detail"]
        .as_str()
        .expect("error detail")
        .contains("simulated fetch failure"));
}

#[tokio::test]
async fn test_identical_filenames_within_one_message() {
    let mut provider = MockProvider::new(vec![vec!["msg-aaaa0001"]]);
    provider.add_message(
        "msg-aaaa0001",
        "Doubles",
        10,
        vec![
            ("report.pdf", "application/pdf", b"first"),
            ("report.pdf", "application/pdf", b"second"),
        ],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("run");

    assert_eq!(summary.attachments_saved, 2);

    let folder = dir.path().join("2024-01-10_Doubles_aaaa0001");
    assert_eq!(fs::read(folder.join("report.pdf")).expect("first"), b"first");
    assert_eq!(
        fs::read(folder.join("report_1.pdf")).expect("second"),
        b"second"
    );
}

#[tokio::test]
async fn test_rate_limited_page_retries_then_quota_exceeded() {
    let mut provider =
        MockProvider::new(vec![vec!["msg-aaaa0001"], vec!["msg-bbbb0002"]]);
    provider.add_message(
        "msg-aaaa0001",
        "Invoice January",
        10,
        vec![("invoice.pdf", "application/pdf", b"%PDF-1.4 one")],
    );
    provider.add_message(
        "msg-bbbb0002",
        "Receipt",
        20,
        vec![("receipt.pdf", "application/pdf", b"%PDF-1.4 two")],
    );
    provider.rate_limited_page = Some(1);

    let dir = tempfile::tempdir().expect("tempdir");
    let result = run(&provider, dir.path(), &options(None, false)).await;

    match result {
        Err(DownloadError::QuotaExceeded { attempts, .. }) => {
            assert_eq!(attempts, 3);
        }
        other => panic!("expected QuotaExceeded, got {:?}", other),
    }

    // Initial request plus max_retries retries for the poisoned page
    assert_eq!(provider.list_calls_for(Some("page-1")), 4);
    assert_eq!(provider.list_calls_for(None), 1);

    // Page 1 progress survived the abort
    let entries = log_entries(dir.path());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["message_id"], "msg-aaaa0001");
    assert_eq!(entries[0]["status"], "success");
}

#[tokio::test]
async fn test_pagination_spans_multiple_pages() {
    let mut provider = MockProvider::new(vec![
        vec!["msg-aaaa0001", "msg-bbbb0002"],
        vec!["msg-cccc0003"],
    ]);
    provider.add_message(
        "msg-aaaa0001",
        "One",
        5,
        vec![("a.pdf", "application/pdf", b"a")],
    );
    provider.add_message(
        "msg-bbbb0002",
        "Two",
        6,
        vec![("b.pdf", "application/pdf", b"b")],
    );
    provider.add_message(
        "msg-cccc0003",
        "Three",
        7,
        vec![("c.pdf", "application/pdf", b"c")],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(None, false))
        .await
        .expect("run");

    assert_eq!(
        summary,
        Summary {
            messages_processed: 3,
            attachments_saved: 3,
            errors: 0,
        }
    );
    assert_eq!(message_folders(dir.path()).len(), 3);
}

#[tokio::test]
async fn test_limit_caps_downloaded_messages() {
    let mut provider = MockProvider::new(vec![vec!["msg-aaaa0001", "msg-bbbb0002"]]);
    provider.add_message(
        "msg-aaaa0001",
        "One",
        5,
        vec![("a.pdf", "application/pdf", b"a")],
    );
    provider.add_message(
        "msg-bbbb0002",
        "Two",
        6,
        vec![("b.pdf", "application/pdf", b"b")],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(Some(1), false))
        .await
        .expect("run");

    assert_eq!(summary.messages_processed, 1);
    assert_eq!(message_folders(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let mut provider = MockProvider::new(vec![vec!["msg-aaaa0001"]]);
    provider.add_message(
        "msg-aaaa0001",
        "Invoice January",
        10,
        vec![("invoice.pdf", "application/pdf", b"%PDF-1.4 one")],
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let summary = run(&provider, dir.path(), &options(None, true))
        .await
        .expect("dry run");

    assert_eq!(
        summary,
        Summary {
            messages_processed: 1,
            attachments_saved: 1,
            errors: 0,
        }
    );

    assert!(message_folders(dir.path()).is_empty());
    let log = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).expect("log file");
    assert!(log.is_empty(), "dry-run must not append log entries");
}
