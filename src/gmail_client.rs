use anyhow::{Context, Result};
use google_gmail1::api::Scope;
use google_gmail1::{hyper, hyper_rustls, oauth2, Gmail};
use log::{debug, info, warn};

use crate::config::GmailConfig;
use crate::error::DownloadError;
use crate::provider::{FetchedMessage, MailProvider, MessagePage, MessagePart, MessageRef};

const USER_ID: &str = "me";

pub struct GmailClient {
    hub: Gmail<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>,
}

impl GmailClient {
    pub async fn new(config: &GmailConfig) -> Result<Self> {
        info!("Connecting to Gmail API via OAuth2");

        // Read OAuth2 client credentials from file
        let secret = oauth2::read_application_secret(&config.credentials_path)
            .await
            .context("Unable to read OAuth2 client credentials file")?;

        // Create authenticator with token persistence
        // Note: downloading attachments only needs Scope::Readonly, which is
        // requested on every API call below
        let auth = oauth2::InstalledFlowAuthenticator::builder(
            secret,
            oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&config.token_cache_path)
        .build()
        .await
        .context("Unable to create OAuth2 authenticator")?;

        // Create HTTP client
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper::Client::builder().build(connector);

        let hub = Gmail::new(client, auth);

        info!("✅ Gmail API connection established successfully");

        Ok(GmailClient { hub })
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage, DownloadError> {
        debug!("Searching messages, page token: {:?}", page_token);

        let mut call = self
            .hub
            .users()
            .messages_list(USER_ID)
            .q(query)
            .max_results(page_size)
            .add_scope(Scope::Readonly);

        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let (_, response) = call.doit().await.map_err(classify_gmail_error)?;

        let ids: Vec<String> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg| msg.id)
            .collect();

        debug!("Search page returned {} message id(s)", ids.len());

        Ok(MessagePage {
            ids,
            next_page_token: response.next_page_token,
        })
    }

    async fn fetch_full(&self, message_id: &str) -> Result<FetchedMessage, DownloadError> {
        debug!("Complete message retrieval for ID: {}", message_id);

        let (_, message) = self
            .hub
            .users()
            .messages_get(USER_ID, message_id)
            .format("full")
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(classify_gmail_error)?;

        let id = message.id.unwrap_or_else(|| message_id.to_string());

        let internal_date = match message
            .internal_date
            .and_then(chrono::DateTime::from_timestamp_millis)
        {
            Some(date) => date,
            None => {
                warn!("No internal date on message {}, using current time", id);
                chrono::Utc::now()
            }
        };

        let payload = message
            .payload
            .ok_or_else(|| DownloadError::Provider(format!("message {} has no payload", id)))?;

        // Extract the subject from the payload headers
        let mut subject = String::from("No subject");
        if let Some(headers) = &payload.headers {
            for header in headers {
                if let (Some(name), Some(value)) = (&header.name, &header.value) {
                    if name == "Subject" {
                        subject = value.clone();
                    }
                }
            }
        }

        let body = self.convert_part(&id, payload).await?;

        Ok(FetchedMessage {
            meta: MessageRef {
                id,
                internal_date,
                subject,
            },
            body,
        })
    }

    /// Convert the API part tree into the domain part tree, resolving
    /// attachment bodies on the way down.
    fn convert_part<'a>(
        &'a self,
        message_id: &'a str,
        part: google_gmail1::api::MessagePart,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<MessagePart, DownloadError>> + Send + 'a>,
    > {
        Box::pin(async move {
            if let Some(children) = part.parts {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    parts.push(self.convert_part(message_id, child).await?);
                }
                return Ok(MessagePart::Container { parts });
            }

            let filename = part.filename.filter(|f| !f.is_empty());
            let mime_type = part
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let body = part.body.unwrap_or_default();

            // Named parts reference their bytes through a separate
            // attachments.get call; unnamed parts are body content the
            // pipeline never reads, so their bodies stay unfetched.
            let payload = match (body.data, body.attachment_id, &filename) {
                (Some(data), _, _) => data,
                (None, Some(attachment_id), Some(_)) => {
                    self.fetch_attachment_body(message_id, &attachment_id)
                        .await?
                }
                _ => Vec::new(),
            };

            Ok(MessagePart::Leaf {
                filename,
                mime_type,
                payload,
            })
        })
    }

    async fn fetch_attachment_body(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, DownloadError> {
        debug!(
            "Fetching attachment body {} for message {}",
            attachment_id, message_id
        );

        let (_, attachment) = self
            .hub
            .users()
            .messages_attachments_get(USER_ID, message_id, attachment_id)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(classify_gmail_error)?;

        // The data field is already base64url-decoded by the API layer
        attachment.data.ok_or_else(|| {
            DownloadError::Provider(format!(
                "attachment {} of message {} has no data",
                attachment_id, message_id
            ))
        })
    }
}

impl MailProvider for GmailClient {
    fn list_messages<'a>(
        &'a self,
        query: &'a str,
        page_token: Option<&'a str>,
        page_size: u32,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<MessagePage, DownloadError>> + Send + 'a>,
    > {
        Box::pin(self.list_page(query, page_token, page_size))
    }

    fn get_message<'a>(
        &'a self,
        message_id: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<FetchedMessage, DownloadError>> + Send + 'a>,
    > {
        Box::pin(self.fetch_full(message_id))
    }
}

/// Map a Gmail API error onto the pipeline taxonomy. Rate limiting shows up
/// either as a bare HTTP 429 or as a structured error with a
/// rateLimitExceeded reason; everything else is a plain provider error.
fn classify_gmail_error(err: google_gmail1::Error) -> DownloadError {
    match err {
        google_gmail1::Error::Failure(response)
            if response.status() == hyper::StatusCode::TOO_MANY_REQUESTS =>
        {
            DownloadError::RateLimited("HTTP 429 Too Many Requests".to_string())
        }
        google_gmail1::Error::BadRequest(value) => {
            let code = value["error"]["code"].as_i64().unwrap_or(0);
            let reason = value["error"]["errors"][0]["reason"]
                .as_str()
                .unwrap_or("")
                .to_string();

            if code == 429 || reason == "rateLimitExceeded" || reason == "userRateLimitExceeded" {
                DownloadError::RateLimited(format!("code {} ({})", code, reason))
            } else {
                DownloadError::Provider(value.to_string())
            }
        }
        other => DownloadError::Provider(other.to_string()),
    }
}
