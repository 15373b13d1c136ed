use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use kingest_client::{KustoTransport, StreamingPost};
use kingest_core::config::StreamingConfig;
use kingest_core::{
    CallContext, Compression, IngestError, IngestionProperties, IngestionResult, IngestionSource,
};

use crate::ingestor::Ingestor;
use crate::payload::{prepare, Payload, Prepared};

/// Engine endpoint accepting streaming ingest posts.
#[async_trait]
pub trait StreamingEndpoint: Send + Sync {
    async fn post(&self, request: StreamingPost) -> Result<(), IngestError>;
}

#[async_trait]
impl StreamingEndpoint for KustoTransport {
    async fn post(&self, request: StreamingPost) -> Result<(), IngestError> {
        self.post_streaming(request).await.map_err(IngestError::from)
    }
}

/// A single streaming attempt over an already buffered payload.
#[async_trait]
pub trait Streamer: Send + Sync {
    fn max_payload_bytes(&self) -> u64;

    /// Upper bound on buffering the source before the first attempt.
    fn read_timeout(&self) -> Duration;

    async fn stream_payload(
        &self,
        payload: &Payload,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<(), IngestError>;
}

/// Posts each source in one request. Never retries.
pub struct StreamingIngestor {
    endpoint: Arc<dyn StreamingEndpoint>,
    config: StreamingConfig,
}

impl StreamingIngestor {
    pub fn new(endpoint: Arc<dyn StreamingEndpoint>, config: StreamingConfig) -> Self {
        Self { endpoint, config }
    }
}

#[async_trait]
impl Streamer for StreamingIngestor {
    fn max_payload_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    fn read_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    async fn stream_payload(
        &self,
        payload: &Payload,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<(), IngestError> {
        if payload.len() > self.config.max_bytes {
            return Err(IngestError::SizeExceeded {
                size: payload.len(),
                limit: self.config.max_bytes,
            });
        }
        if payload.compression == Compression::Zip {
            return Err(IngestError::Unsupported {
                strategy: "streaming",
                reason: "zip archives cannot be streamed".into(),
            });
        }

        let request_id = Uuid::new_v4();
        let request = StreamingPost {
            database: props.database.clone(),
            table: props.table.clone(),
            format: props.format.as_str().to_string(),
            mapping: props.mapping_reference.clone(),
            content_encoding: payload
                .compression
                .labelled_for(props.format)
                .content_encoding(),
            client_request_id: request_id.to_string(),
            body: payload.bytes.clone(),
        };
        debug!(
            database = %props.database,
            table = %props.table,
            bytes = payload.len(),
            request_id = %request_id,
            "Streaming payload"
        );
        ctx.run(self.config.request_timeout, self.endpoint.post(request))
            .await
    }
}

#[async_trait]
impl Ingestor for StreamingIngestor {
    async fn ingest(
        &self,
        source: IngestionSource,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<IngestionResult, IngestError> {
        props.validate()?;
        ctx.check()?;

        let (meta, kind) = source.into_parts();
        let limit = self.config.max_bytes;
        let declared = meta.raw_size;
        let prepared = ctx
            .run(self.config.request_timeout, prepare(meta, kind, limit))
            .await?;
        let payload = match prepared {
            Prepared::Buffered { payload, .. } => payload,
            Prepared::TooLarge(_) => {
                return Err(IngestError::SizeExceeded {
                    size: declared.unwrap_or(limit + 1),
                    limit,
                })
            }
            Prepared::Unstreamable(source) => {
                return Err(IngestError::Unsupported {
                    strategy: "streaming",
                    reason: format!("{} sources cannot be streamed", source.kind().label()),
                })
            }
        };

        self.stream_payload(&payload, props, ctx).await?;
        info!(
            source_id = %meta.id,
            database = %props.database,
            table = %props.table,
            bytes = payload.len(),
            "Streaming ingestion committed"
        );
        Ok(IngestionResult::streamed(meta.id, props, 1))
    }
}
