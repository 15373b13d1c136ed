use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use kingest_client::V1Table;
use kingest_core::{IngestError, ResourceUri};

const TEMP_STORAGE: &str = "TempStorage";
const INGESTION_QUEUE: &str = "SecuredReadyForAggregationQueue";
const SUCCESS_QUEUE: &str = "SuccessfulIngestionsQueue";
const FAILURE_QUEUE: &str = "FailedIngestionsQueue";
const STATUS_TABLE: &str = "IngestionsStatusTable";

/// One discovered resource set. Never mutated after construction apart from
/// the round-robin cursors.
#[derive(Debug)]
pub struct IngestionResources {
    pub containers: Vec<ResourceUri>,
    pub queues: Vec<ResourceUri>,
    pub status_table: Option<ResourceUri>,
    pub successful_queue: Option<ResourceUri>,
    pub failed_queue: Option<ResourceUri>,
    /// Identity token forwarded to the service inside queue messages.
    pub authorization_context: Option<String>,
    pub fetched_at: DateTime<Utc>,
    container_cursor: AtomicUsize,
    queue_cursor: AtomicUsize,
}

impl IngestionResources {
    pub fn new(containers: Vec<ResourceUri>, queues: Vec<ResourceUri>) -> Self {
        Self {
            containers,
            queues,
            status_table: None,
            successful_queue: None,
            failed_queue: None,
            authorization_context: None,
            fetched_at: Utc::now(),
            container_cursor: AtomicUsize::new(0),
            queue_cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_status_table(mut self, table: ResourceUri) -> Self {
        self.status_table = Some(table);
        self
    }

    pub fn with_authorization_context(mut self, token: impl Into<String>) -> Self {
        self.authorization_context = Some(token.into());
        self
    }

    /// Build from the `.get ingestion resources` result table
    /// (`ResourceTypeName`, `StorageRoot`).
    pub fn from_v1(table: &V1Table) -> Result<Self, IngestError> {
        let name_col = table
            .column_index("ResourceTypeName")
            .ok_or_else(|| IngestError::Decode("missing ResourceTypeName column".into()))?;
        let root_col = table
            .column_index("StorageRoot")
            .ok_or_else(|| IngestError::Decode("missing StorageRoot column".into()))?;

        let mut resources = Self::new(Vec::new(), Vec::new());

        for row in &table.rows {
            let (Some(name), Some(root)) = (
                row.get(name_col).and_then(|v| v.as_str()),
                row.get(root_col).and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let uri = ResourceUri::parse(root)?;
            match name {
                TEMP_STORAGE => resources.containers.push(uri),
                INGESTION_QUEUE => resources.queues.push(uri),
                SUCCESS_QUEUE => resources.successful_queue = Some(uri),
                FAILURE_QUEUE => resources.failed_queue = Some(uri),
                STATUS_TABLE => resources.status_table = Some(uri),
                other => debug!(resource = other, "Ignoring unknown ingestion resource"),
            }
        }

        if resources.containers.is_empty() {
            return Err(IngestError::NoResources("staging containers"));
        }
        if resources.queues.is_empty() {
            return Err(IngestError::NoResources("ingestion queues"));
        }
        Ok(resources)
    }

    pub fn next_container(&self) -> Result<&ResourceUri, IngestError> {
        pick(&self.containers, &self.container_cursor)
            .ok_or(IngestError::NoResources("staging containers"))
    }

    pub fn next_queue(&self) -> Result<&ResourceUri, IngestError> {
        pick(&self.queues, &self.queue_cursor).ok_or(IngestError::NoResources("ingestion queues"))
    }

    pub fn status_table(&self) -> Result<&ResourceUri, IngestError> {
        self.status_table
            .as_ref()
            .ok_or(IngestError::NoResources("status table"))
    }

    /// Earliest SAS expiry across every resource in the set.
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.containers
            .iter()
            .chain(self.queues.iter())
            .chain(self.status_table.iter())
            .chain(self.successful_queue.iter())
            .chain(self.failed_queue.iter())
            .filter_map(ResourceUri::signed_expiry)
            .min()
    }
}

fn pick<'a>(items: &'a [ResourceUri], cursor: &AtomicUsize) -> Option<&'a ResourceUri> {
    if items.is_empty() {
        return None;
    }
    let i = cursor.fetch_add(1, Ordering::Relaxed) % items.len();
    items.get(i)
}
