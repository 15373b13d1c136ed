use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use kingest_core::config::QueuedConfig;
use kingest_core::{
    source_name, strip_query, CallContext, Compression, IngestError, IngestionProperties,
    IngestionResult, IngestionSource, SourceKind, StatusHandle,
};
use kingest_queue::{IngestionMessage, QueueProducer};
use kingest_resources::ResourceCache;
use kingest_storage::{staged_blob_name, BlobStager};

use crate::ingestor::Ingestor;
use crate::status::{StatusRecord, StatusTable};

/// Bytes to upload to a staging container.
enum Upload {
    /// Re-opened on every attempt.
    File(PathBuf),
    /// Read once, re-used across attempts.
    Buffer(Bytes),
}

struct Staged {
    /// Blob URI with SAS, as written into the message.
    uri: String,
    size: Option<u64>,
}

/// Stages data to blob storage and posts an ingestion message. The result
/// means "accepted for ingestion", not "ingested".
pub struct QueuedIngestor {
    resources: Arc<ResourceCache>,
    stager: BlobStager,
    producer: Arc<dyn QueueProducer>,
    status_table: Arc<dyn StatusTable>,
    config: QueuedConfig,
}

impl QueuedIngestor {
    pub fn new(
        resources: Arc<ResourceCache>,
        stager: BlobStager,
        producer: Arc<dyn QueueProducer>,
        status_table: Arc<dyn StatusTable>,
        config: QueuedConfig,
    ) -> Self {
        Self {
            resources,
            stager,
            producer,
            status_table,
            config,
        }
    }

    async fn stage(
        &self,
        upload: Upload,
        blob_name: &str,
        ctx: &CallContext,
    ) -> Result<Staged, IngestError> {
        self.config
            .retry
            .run(ctx, "stage", |attempt| {
                self.stage_once(&upload, blob_name, attempt, ctx)
            })
            .await
    }

    async fn stage_once(
        &self,
        upload: &Upload,
        blob_name: &str,
        attempt: u32,
        ctx: &CallContext,
    ) -> Result<Staged, IngestError> {
        let resources = self.resources.get(ctx).await?;
        let container = resources.next_container()?.clone();
        debug!(container = %container, blob = blob_name, attempt, "Uploading to staging container");

        let put = async {
            let blob = match upload {
                Upload::File(path) => self.stager.stage_file(&container, blob_name, path).await,
                Upload::Buffer(bytes) => {
                    self.stager
                        .stage_bytes(&container, blob_name, bytes.clone())
                        .await
                }
            };
            blob.map_err(IngestError::from)
        };
        let blob = ctx.run(self.config.upload_timeout, put).await?;
        Ok(Staged {
            uri: blob.uri,
            size: Some(blob.size),
        })
    }

    async fn enqueue_once(&self, text: &str, attempt: u32, ctx: &CallContext) -> Result<(), IngestError> {
        let resources = self.resources.get(ctx).await?;
        let queue = resources.next_queue()?.clone();
        debug!(queue = %queue, attempt, "Posting ingestion message");
        let post = async {
            self.producer
                .enqueue(&queue, text)
                .await
                .map_err(IngestError::from)
        };
        ctx.run(self.config.enqueue_timeout, post).await
    }
}

#[async_trait]
impl Ingestor for QueuedIngestor {
    async fn ingest(
        &self,
        source: IngestionSource,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<IngestionResult, IngestError> {
        props.validate()?;
        ctx.check()?;

        let (meta, kind) = source.into_parts();
        let name = source_name(&kind, props.format, meta.compression);
        let blob_name = staged_blob_name(&props.database, &props.table, meta.id, &name);
        let staged = match kind {
            SourceKind::Blob(uri) => Staged { uri, size: None },
            SourceKind::File(path) => self.stage(Upload::File(path), &blob_name, ctx).await?,
            SourceKind::Stream(mut reader) => {
                let mut buf = Vec::new();
                let read = async { reader.read_to_end(&mut buf).await.map_err(IngestError::from) };
                ctx.run(self.config.upload_timeout, read).await?;
                drop(reader);
                self.stage(Upload::Buffer(buf.into()), &blob_name, ctx).await?
            }
        };

        // Staged size is only the raw size when nothing was compressed.
        let raw_size = meta.raw_size.or(match meta.compression {
            Compression::None => staged.size,
            _ => None,
        });

        let retry = &self.config.retry;
        let resources = retry
            .run(ctx, "resources", |_| self.resources.get(ctx))
            .await?;
        let status = if props.report_method.uses_table() {
            let table = resources.status_table()?.clone();
            let pending = StatusRecord::pending(meta.id, props, strip_query(&staged.uri));
            retry
                .run(ctx, "status insert", |_| {
                    ctx.run(
                        self.config.enqueue_timeout,
                        self.status_table.insert(&table, &pending),
                    )
                })
                .await?;
            Some(StatusHandle {
                source_id: meta.id,
                table,
            })
        } else {
            None
        };

        let mut message = IngestionMessage::new(
            meta.id,
            staged.uri.as_str(),
            raw_size,
            props,
            resources.authorization_context.as_deref(),
        )?;
        if let Some(handle) = &status {
            message = message.with_status_table(handle.table.authorized());
        }
        let text = message.to_wire()?;

        retry
            .run(ctx, "enqueue", |attempt| self.enqueue_once(&text, attempt, ctx))
            .await?;

        info!(
            source_id = %meta.id,
            database = %props.database,
            table = %props.table,
            blob = strip_query(&staged.uri),
            "Queued ingestion accepted"
        );
        Ok(IngestionResult::queued(
            meta.id,
            props,
            strip_query(&staged.uri).to_string(),
            status,
        ))
    }
}
