use std::sync::Arc;

use tracing::info;

use kingest_client::{KustoTransport, TokenProvider};
use kingest_core::{IngestConfig, IngestError};
use kingest_queue::AzureQueueProducer;
use kingest_resources::{MgmtResourceFetcher, ResourceCache};
use kingest_storage::{AzureStoreFactory, BlobStager};

use crate::managed::ManagedStreamingIngestor;
use crate::queued::QueuedIngestor;
use crate::status::{AzureStatusTable, StatusReporter};
use crate::streaming::StreamingIngestor;

/// Every ingestion strategy wired against one cluster, sharing one
/// resource cache for the lifetime of the client.
pub struct IngestClient {
    resources: Arc<ResourceCache>,
    queued: Arc<QueuedIngestor>,
    streaming: Arc<StreamingIngestor>,
    managed: ManagedStreamingIngestor<StreamingIngestor, QueuedIngestor>,
    status: StatusReporter,
}

impl IngestClient {
    /// Reads `.env` and the process environment, then builds the client.
    pub fn from_env(tokens: Arc<dyn TokenProvider>) -> Result<Self, IngestError> {
        kingest_core::config::load_dotenv();
        let config = IngestConfig::from_env();
        config.log_summary();
        Self::new(&config, tokens)
    }

    pub fn new(config: &IngestConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, IngestError> {
        let engine = KustoTransport::new(
            &config.engine.endpoint,
            tokens.clone(),
            config.streaming.request_timeout,
        )?;
        let data_management = KustoTransport::new(
            &config.engine.ingest_endpoint,
            tokens,
            config.resources.request_timeout,
        )?;

        let resources = Arc::new(ResourceCache::new(
            Arc::new(MgmtResourceFetcher::new(data_management)),
            config.resources.clone(),
        ));
        let stager = BlobStager::new(
            Arc::new(AzureStoreFactory::new()),
            config.queued.upload_chunk_bytes,
        );
        let producer = Arc::new(AzureQueueProducer::new(config.queued.enqueue_timeout)?);
        let status_table = Arc::new(AzureStatusTable::new(config.queued.enqueue_timeout)?);

        let queued = Arc::new(QueuedIngestor::new(
            resources.clone(),
            stager,
            producer,
            status_table.clone(),
            config.queued.clone(),
        ));
        let streaming = Arc::new(StreamingIngestor::new(
            Arc::new(engine),
            config.streaming.clone(),
        ));
        let managed =
            ManagedStreamingIngestor::new(streaming.clone(), queued.clone(), config.managed.clone());
        let status = StatusReporter::new(
            resources.clone(),
            status_table,
            config.queued.enqueue_timeout,
        );

        info!(
            endpoint = %config.engine.endpoint,
            ingest_endpoint = %config.engine.ingest_endpoint,
            profile = config.profile_label(),
            "Ingest client ready"
        );
        Ok(Self {
            resources,
            queued,
            streaming,
            managed,
            status,
        })
    }

    pub fn queued(&self) -> &QueuedIngestor {
        &self.queued
    }

    pub fn streaming(&self) -> &StreamingIngestor {
        &self.streaming
    }

    pub fn managed(&self) -> &ManagedStreamingIngestor<StreamingIngestor, QueuedIngestor> {
        &self.managed
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }
}
