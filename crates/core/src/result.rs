use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::properties::IngestionProperties;
use crate::resource::ResourceUri;

/// Path that completed an ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Streaming,
    Queued,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Streaming => f.write_str("streaming"),
            Strategy::Queued => f.write_str("queued"),
        }
    }
}

/// Key for a status-table lookup of a queued ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHandle {
    pub source_id: Uuid,
    pub table: ResourceUri,
}

impl StatusHandle {
    pub fn partition_key(&self) -> String {
        self.source_id.to_string()
    }

    pub fn row_key(&self) -> String {
        self.source_id.to_string()
    }
}

/// Outcome handed back to the caller, exactly one per submitted source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub source_id: Uuid,
    pub strategy: Strategy,
    pub database: String,
    pub table: String,
    /// Staged or referenced blob, credentials stripped. Queued only.
    pub blob_uri: Option<String>,
    /// Streaming attempts made before the call completed.
    pub streaming_attempts: u32,
    /// Present for queued results whose properties request table reporting.
    pub status: Option<StatusHandle>,
}

impl IngestionResult {
    pub fn streamed(source_id: Uuid, props: &IngestionProperties, attempts: u32) -> Self {
        Self {
            source_id,
            strategy: Strategy::Streaming,
            database: props.database.clone(),
            table: props.table.clone(),
            blob_uri: None,
            streaming_attempts: attempts,
            status: None,
        }
    }

    pub fn queued(
        source_id: Uuid,
        props: &IngestionProperties,
        blob_uri: String,
        status: Option<StatusHandle>,
    ) -> Self {
        Self {
            source_id,
            strategy: Strategy::Queued,
            database: props.database.clone(),
            table: props.table.clone(),
            blob_uri: Some(blob_uri),
            streaming_attempts: 0,
            status,
        }
    }

    pub fn is_streamed(&self) -> bool {
        self.strategy == Strategy::Streaming
    }
}
