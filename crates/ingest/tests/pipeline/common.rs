//! In-memory fakes for every external seam, wired into real ingestors.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tokio::io::{AsyncRead, ReadBuf};
use uuid::Uuid;

use kingest_client::StreamingPost;
use kingest_core::{IngestConfig, IngestError, ResourceUri, RetryPolicy};
use kingest_ingest::{
    ManagedStreamingIngestor, QueuedIngestor, StatusRecord, StatusTable, StreamingEndpoint,
    StreamingIngestor,
};
use kingest_queue::{IngestionMessage, QueueError, QueueProducer};
use kingest_resources::{IngestionResources, ResourceCache, ResourceFetcher};
use kingest_storage::{BlobStager, StorageError, StoreFactory};

pub const CONTAINER: &str = "https://acct.blob.core.windows.net/temp?sv=2022&sig=c";
pub const QUEUE: &str = "https://acct.queue.core.windows.net/ready?sv=2022&sig=q";
pub const TABLE: &str = "https://acct.table.core.windows.net/status?sv=2022&sig=t";

static TRACING: Once = Once::new();

/// Honours `RUST_LOG`; silent otherwise.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn uri(raw: &str) -> ResourceUri {
    ResourceUri::parse(raw).unwrap()
}

/// A reader whose first read never completes.
pub struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

// ── Resource discovery ────────────────────────────────────────

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self) -> Result<IngestionResources, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(IngestionResources::new(vec![uri(CONTAINER)], vec![uri(QUEUE)])
            .with_status_table(uri(TABLE))
            .with_authorization_context("identity-token"))
    }
}

// ── Staging ───────────────────────────────────────────────────

pub fn connection_reset() -> StorageError {
    StorageError::Io(io::Error::from(io::ErrorKind::ConnectionReset))
}

pub fn permission_denied() -> StorageError {
    StorageError::ObjectStore(object_store::Error::PermissionDenied {
        path: "temp".into(),
        source: "403 AuthorizationPermissionMismatch".into(),
    })
}

/// Hands out one shared in-memory store; the first `fail_first` lookups
/// fail with `failure()`.
pub struct MemoryFactory {
    pub store: Arc<InMemory>,
    pub lookups: AtomicUsize,
    fail_first: usize,
    failure: fn() -> StorageError,
}

impl MemoryFactory {
    pub fn new(fail_first: usize, failure: fn() -> StorageError) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            lookups: AtomicUsize::new(0),
            fail_first,
            failure,
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub async fn object_names(&self) -> Vec<String> {
        let listed = self.store.list_with_delimiter(None).await.unwrap();
        listed
            .objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect()
    }
}

impl StoreFactory for MemoryFactory {
    fn store_for(&self, _: &ResourceUri) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err((self.failure)());
        }
        Ok(self.store.clone())
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProducer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingProducer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<IngestionMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| IngestionMessage::from_wire(text).unwrap())
            .collect()
    }
}

#[async_trait]
impl QueueProducer for RecordingProducer {
    async fn enqueue(&self, queue: &ResourceUri, message_text: &str) -> Result<(), QueueError> {
        self.sent
            .lock()
            .unwrap()
            .push((queue.base().to_string(), message_text.to_string()));
        Ok(())
    }
}

// ── Status table ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStatusTable {
    pub rows: Mutex<Vec<StatusRecord>>,
}

impl FakeStatusTable {
    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut StatusRecord)) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            f(row);
        }
    }
}

#[async_trait]
impl StatusTable for FakeStatusTable {
    async fn insert(&self, _: &ResourceUri, record: &StatusRecord) -> Result<(), IngestError> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get(&self, _: &ResourceUri, id: Uuid) -> Result<Option<StatusRecord>, IngestError> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }
}

// ── Streaming endpoint ────────────────────────────────────────

/// Replies from a script, then succeeds once the script runs dry.
#[derive(Default)]
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<IngestError>>,
    pub posts: Mutex<Vec<StreamingPost>>,
}

impl ScriptedEndpoint {
    pub fn fail_with(&self, errors: impl IntoIterator<Item = IngestError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamingEndpoint for ScriptedEndpoint {
    async fn post(&self, request: StreamingPost) -> Result<(), IngestError> {
        self.posts.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub fn throttled() -> IngestError {
    IngestError::from_status(429, "TooManyRequests", "throttled")
}

pub fn bad_request() -> IngestError {
    IngestError::from_status(400, "BadRequest_InvalidFormat", "malformed csv")
}

pub fn streaming_disabled() -> IngestError {
    IngestError::from_status(
        400,
        "BadRequest_StreamingIngestionPolicyNotEnabled",
        "streaming policy is not enabled",
    )
}

// ── Harness ───────────────────────────────────────────────────

/// Deterministic timings: no jitter, 100 ms base backoff.
pub fn test_config(streaming_attempts: u32, max_stream_bytes: u64) -> IngestConfig {
    let mut config = IngestConfig::for_endpoint("https://testcluster.westeurope.kusto.windows.net");
    config.streaming.max_bytes = max_stream_bytes;
    config.managed.retry = RetryPolicy::new(streaming_attempts)
        .base_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(5))
        .with_jitter(false);
    config.queued.retry = RetryPolicy::new(3)
        .base_delay(Duration::from_millis(50))
        .with_jitter(false);
    config.queued.upload_chunk_bytes = 1024 * 1024;
    config
}

pub struct Harness {
    pub fetcher: Arc<FakeFetcher>,
    pub factory: Arc<MemoryFactory>,
    pub producer: Arc<RecordingProducer>,
    pub status: Arc<FakeStatusTable>,
    pub endpoint: Arc<ScriptedEndpoint>,
    pub resources: Arc<ResourceCache>,
    pub queued: Arc<QueuedIngestor>,
    pub streaming: Arc<StreamingIngestor>,
    pub managed: ManagedStreamingIngestor<StreamingIngestor, QueuedIngestor>,
}

impl Harness {
    pub fn new(config: IngestConfig) -> Self {
        Self::with_staging_failures(config, 0)
    }

    pub fn with_staging_failures(config: IngestConfig, fail_first: usize) -> Self {
        Self::with_staging_error(config, fail_first, connection_reset)
    }

    pub fn with_staging_error(
        config: IngestConfig,
        fail_first: usize,
        failure: fn() -> StorageError,
    ) -> Self {
        init_test_tracing();
        let fetcher = Arc::new(FakeFetcher::default());
        let factory = Arc::new(MemoryFactory::new(fail_first, failure));
        let producer = Arc::new(RecordingProducer::default());
        let status = Arc::new(FakeStatusTable::default());
        let endpoint = Arc::new(ScriptedEndpoint::default());

        let resources = Arc::new(ResourceCache::new(fetcher.clone(), config.resources.clone()));
        let stager = BlobStager::new(factory.clone(), config.queued.upload_chunk_bytes);
        let queued = Arc::new(QueuedIngestor::new(
            resources.clone(),
            stager,
            producer.clone(),
            status.clone(),
            config.queued.clone(),
        ));
        let streaming = Arc::new(StreamingIngestor::new(
            endpoint.clone(),
            config.streaming.clone(),
        ));
        let managed =
            ManagedStreamingIngestor::new(streaming.clone(), queued.clone(), config.managed.clone());

        Self {
            fetcher,
            factory,
            producer,
            status,
            endpoint,
            resources,
            queued,
            streaming,
            managed,
        }
    }
}
