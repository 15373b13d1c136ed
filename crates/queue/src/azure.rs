//! Azure Storage queue producer over REST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use kingest_core::ResourceUri;

use crate::error::QueueError;
use crate::producer::QueueProducer;

const STORAGE_API_VERSION: &str = "2021-08-06";

/// SAS-authorized `Put Message` against `{queue}/messages`.
pub struct AzureQueueProducer {
    client: Client,
}

impl AzureQueueProducer {
    pub fn new(timeout: Duration) -> Result<Self, QueueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

/// `Put Message` request body. The text is already base64, so it needs no
/// XML escaping.
pub fn put_message_body(message_text: &str) -> String {
    format!("<QueueMessage><MessageText>{message_text}</MessageText></QueueMessage>")
}

#[async_trait]
impl QueueProducer for AzureQueueProducer {
    async fn enqueue(&self, queue: &ResourceUri, message_text: &str) -> Result<(), QueueError> {
        let url = queue.authorized_path("/messages");
        debug!(queue = %queue, bytes = message_text.len(), "Enqueueing ingestion message");

        let response = self
            .client
            .post(url)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(CONTENT_TYPE, "application/xml")
            .body(put_message_body(message_text))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::from_status(status.as_u16(), body))
    }
}
