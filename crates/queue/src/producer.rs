//! Queue producer trait.

use async_trait::async_trait;

use kingest_core::ResourceUri;

use crate::error::QueueError;

/// Posts message text to an ingestion queue.
///
/// Implementations send exactly one message per call and do not retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn enqueue(&self, queue: &ResourceUri, message_text: &str) -> Result<(), QueueError>;
}
