use log::debug;

use crate::error::DownloadError;
use crate::provider::{MailProvider, MessagePart, MessageRef};

/// One attachment pulled out of a message part tree.
#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub payload: Vec<u8>,
}

/// Fetch one message and extract its attachments.
///
/// Any provider failure is narrowed to `Fetch` for this message id so the
/// caller can record it and move on; a single message must never take the
/// whole run down.
pub async fn fetch_message_attachments(
    provider: &dyn MailProvider,
    message_id: &str,
) -> Result<(MessageRef, Vec<AttachmentDescriptor>), DownloadError> {
    let fetched = provider
        .get_message(message_id)
        .await
        .map_err(|e| DownloadError::Fetch {
            message_id: message_id.to_string(),
            reason: e.to_string(),
        })?;

    let attachments = collect_attachments(fetched.body);
    debug!(
        "Message {} yielded {} attachment(s)",
        fetched.meta.id,
        attachments.len()
    );

    Ok((fetched.meta, attachments))
}

/// Depth-first walk of the part tree, collecting every leaf that carries a
/// non-empty filename. Leaves without one are message body content.
pub fn collect_attachments(root: MessagePart) -> Vec<AttachmentDescriptor> {
    let mut out = Vec::new();
    collect_into(root, &mut out);
    out
}

fn collect_into(part: MessagePart, out: &mut Vec<AttachmentDescriptor>) {
    match part {
        MessagePart::Container { parts } => {
            for child in parts {
                collect_into(child, out);
            }
        }
        MessagePart::Leaf {
            filename: Some(filename),
            mime_type,
            payload,
        } if !filename.is_empty() => {
            out.push(AttachmentDescriptor {
                size_bytes: payload.len() as u64,
                filename,
                mime_type,
                payload,
            });
        }
        MessagePart::Leaf { .. } => {}
    }
}
