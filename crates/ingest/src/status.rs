//! Per-source status rows written by the service for table reporting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use kingest_core::{CallContext, IngestError, IngestionProperties, ResourceUri, RetryPolicy, StatusHandle};
use kingest_resources::ResourceCache;

const TABLE_API_VERSION: &str = "2019-02-02";
const NO_METADATA: &str = "application/json;odata=nometadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusState {
    Pending,
    Queued,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Skipped,
    /// A state this client does not know yet. Polling keeps waiting.
    #[serde(other)]
    Unknown,
}

impl StatusState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StatusState::Pending | StatusState::Queued | StatusState::Unknown
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStatus {
    Permanent,
    Transient,
    Exhausted,
    #[serde(other)]
    Unknown,
}

/// One row of the status table. Partition and row key are both the source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusRecord {
    pub partition_key: String,
    pub row_key: String,
    #[serde(rename = "IngestionSourceId")]
    pub id: Uuid,
    #[serde(rename = "IngestionSourcePath", default)]
    pub source_path: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    pub status: StatusState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_status: Option<FailureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// Row inserted before enqueue so a lookup never races the service.
    pub fn pending(id: Uuid, props: &IngestionProperties, source_path: impl Into<String>) -> Self {
        let key = id.to_string();
        Self {
            partition_key: key.clone(),
            row_key: key,
            id,
            source_path: source_path.into(),
            database: props.database.clone(),
            table: props.table.clone(),
            status: StatusState::Pending,
            failure_status: None,
            error_code: None,
            details: None,
            operation_id: None,
            activity_id: None,
            updated_on: Some(Utc::now()),
        }
    }
}

/// Status table client.
#[async_trait]
pub trait StatusTable: Send + Sync {
    async fn insert(&self, table: &ResourceUri, record: &StatusRecord) -> Result<(), IngestError>;

    /// `None` when no row exists for the id yet.
    async fn get(&self, table: &ResourceUri, id: Uuid) -> Result<Option<StatusRecord>, IngestError>;
}

/// Azure Table storage over REST, authorized by the table SAS.
pub struct AzureStatusTable {
    client: Client,
}

impl AzureStatusTable {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("status table client: {e}")))?;
        Ok(Self { client })
    }
}

/// `(PartitionKey='{id}',RowKey='{id}')`
pub fn entity_path(id: Uuid) -> String {
    format!("(PartitionKey='{id}',RowKey='{id}')")
}

fn network(e: reqwest::Error) -> IngestError {
    IngestError::Network(e.to_string())
}

fn service_error(status: StatusCode, body: String) -> IngestError {
    let reason = status.canonical_reason().unwrap_or_default();
    IngestError::from_status(status.as_u16(), reason, body)
}

#[async_trait]
impl StatusTable for AzureStatusTable {
    async fn insert(&self, table: &ResourceUri, record: &StatusRecord) -> Result<(), IngestError> {
        let response = self
            .client
            .post(table.authorized())
            .header("x-ms-version", TABLE_API_VERSION)
            .header(ACCEPT, NO_METADATA)
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return-no-content")
            .json(record)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if status.is_success() {
            debug!(table = %table, source_id = %record.id, "Inserted status row");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(service_error(status, body))
    }

    async fn get(&self, table: &ResourceUri, id: Uuid) -> Result<Option<StatusRecord>, IngestError> {
        let response = self
            .client
            .get(table.authorized_path(&entity_path(id)))
            .header("x-ms-version", TABLE_API_VERSION)
            .header(ACCEPT, NO_METADATA)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(service_error(status, body));
        }
        let record = response
            .json::<StatusRecord>()
            .await
            .map_err(|e| IngestError::Decode(format!("status row: {e}")))?;
        Ok(Some(record))
    }
}

/// Pull-based status lookups for queued results.
pub struct StatusReporter {
    resources: Arc<ResourceCache>,
    table: Arc<dyn StatusTable>,
    timeout: Duration,
}

impl StatusReporter {
    pub fn new(resources: Arc<ResourceCache>, table: Arc<dyn StatusTable>, timeout: Duration) -> Self {
        Self {
            resources,
            table,
            timeout,
        }
    }

    pub async fn lookup(
        &self,
        handle: &StatusHandle,
        ctx: &CallContext,
    ) -> Result<Option<StatusRecord>, IngestError> {
        ctx.run(self.timeout, self.table.get(&handle.table, handle.source_id))
            .await
    }

    /// Lookup by source id against the currently discovered status table.
    pub async fn lookup_id(
        &self,
        source_id: Uuid,
        ctx: &CallContext,
    ) -> Result<Option<StatusRecord>, IngestError> {
        let resources = self.resources.get(ctx).await?;
        let handle = StatusHandle {
            source_id,
            table: resources.status_table()?.clone(),
        };
        self.lookup(&handle, ctx).await
    }

    /// Poll with backoff until the row reaches a terminal state or the
    /// policy's attempts run out. Returns the last row seen, which is only
    /// non-terminal when polling ran out.
    pub async fn poll_until_terminal(
        &self,
        handle: &StatusHandle,
        policy: &RetryPolicy,
        ctx: &CallContext,
    ) -> Result<Option<StatusRecord>, IngestError> {
        let mut last = None;
        for attempt in 1..=policy.max_attempts.max(1) {
            match self.lookup(handle, ctx).await {
                Ok(Some(record)) if record.status.is_terminal() => return Ok(Some(record)),
                Ok(record) => last = record.or(last),
                Err(e) if e.is_retryable() && ctx.check().is_ok() => {
                    warn!(source_id = %handle.source_id, attempt, error = %e, "Status lookup failed");
                }
                Err(e) => return Err(e),
            }
            if attempt < policy.max_attempts {
                ctx.sleep(policy.backoff_delay(attempt)).await?;
            }
        }
        Ok(last)
    }
}
