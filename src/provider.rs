//! The seam between the download pipeline and the mail provider.
//!
//! The core only ever calls `list_messages` and `get_message`; everything
//! Gmail-specific (OAuth, wire formats, error classification) lives behind
//! this trait in `gmail_client`. Tests substitute a mock provider.

use chrono::{DateTime, Utc};

use crate::error::DownloadError;

/// One page of search results: message ids plus the opaque continuation
/// token, or `None` when this was the last page.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Identifies one mail message. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: String,
    pub internal_date: DateTime<Utc>,
    pub subject: String,
}

/// The recursive body structure of a message: a part is either a container
/// of child parts or a leaf carrying (already decoded) content. Leaves with
/// a filename are attachments; leaves without one are body content.
#[derive(Debug, Clone)]
pub enum MessagePart {
    Container {
        parts: Vec<MessagePart>,
    },
    Leaf {
        filename: Option<String>,
        mime_type: String,
        payload: Vec<u8>,
    },
}

/// A fully fetched message: its identity plus the root of its part tree.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub meta: MessageRef,
    pub body: MessagePart,
}

/// Mail provider operations the pipeline depends on.
pub trait MailProvider: Send + Sync {
    /// Search messages matching `query`, returning one page of ids starting
    /// at `page_token` (`None` for the first page).
    fn list_messages<'a>(
        &'a self,
        query: &'a str,
        page_token: Option<&'a str>,
        page_size: u32,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<MessagePage, DownloadError>> + Send + 'a>,
    >;

    /// Fetch one message with its full part tree and decoded payloads.
    fn get_message<'a>(
        &'a self,
        message_id: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<FetchedMessage, DownloadError>> + Send + 'a>,
    >;
}
