//! Wire shape of the message the service picks up from an ingestion queue.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kingest_core::IngestionProperties;

use crate::error::QueueError;

/// Where the service writes per-source status for table reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusTableRef {
    pub table_connection_string: String,
    pub partition_key: String,
    pub row_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionMessage {
    pub id: Uuid,
    /// Blob URI including its SAS.
    pub blob_path: String,
    /// Uncompressed size; 0 when unknown.
    pub raw_data_size: u64,
    pub database_name: String,
    pub table_name: String,
    pub retain_blob_on_success: bool,
    pub flush_immediately: bool,
    pub report_level: u8,
    pub report_method: u8,
    pub source_message_creation_time: DateTime<Utc>,
    pub additional_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_status_in_table: Option<StatusTableRef>,
}

impl IngestionMessage {
    pub fn new(
        source_id: Uuid,
        blob_path: impl Into<String>,
        raw_size: Option<u64>,
        props: &IngestionProperties,
        authorization_context: Option<&str>,
    ) -> Result<Self, QueueError> {
        // Caller options first so they cannot shadow the reserved keys.
        let mut additional = props.additional_properties.clone();
        additional.insert("format".into(), props.format.as_str().into());
        if let Some(mapping) = &props.mapping_reference {
            additional.insert("ingestionMappingReference".into(), mapping.clone());
        }
        let tags = props.all_tags();
        if !tags.is_empty() {
            additional.insert("tags".into(), json_list(&tags)?);
        }
        if !props.ingest_if_not_exists.is_empty() {
            additional.insert(
                "ingestIfNotExists".into(),
                json_list(&props.ingest_if_not_exists)?,
            );
        }
        if props.ignore_first_record {
            additional.insert("ignoreFirstRecord".into(), "true".into());
        }
        if let Some(token) = authorization_context {
            additional.insert("authorizationContext".into(), token.into());
        }

        Ok(Self {
            id: source_id,
            blob_path: blob_path.into(),
            raw_data_size: raw_size.unwrap_or(0),
            database_name: props.database.clone(),
            table_name: props.table.clone(),
            retain_blob_on_success: props.retain_blob_on_success,
            flush_immediately: props.flush_immediately,
            report_level: props.report_level.code(),
            report_method: props.report_method.code(),
            source_message_creation_time: Utc::now(),
            additional_properties: additional,
            ingestion_status_in_table: None,
        })
    }

    /// Attach the status row the service should update for this source.
    pub fn with_status_table(mut self, table_uri: impl Into<String>) -> Self {
        let key = self.id.to_string();
        self.ingestion_status_in_table = Some(StatusTableRef {
            table_connection_string: table_uri.into(),
            partition_key: key.clone(),
            row_key: key,
        });
        self
    }

    /// JSON, base64 encoded; the queue message text.
    pub fn to_wire(&self) -> Result<String, QueueError> {
        let json = serde_json::to_vec(self).map_err(|e| QueueError::Encode(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub fn from_wire(text: &str) -> Result<Self, QueueError> {
        let json = STANDARD
            .decode(text.trim())
            .map_err(|e| QueueError::Encode(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| QueueError::Encode(e.to_string()))
    }
}

fn json_list(items: &[String]) -> Result<String, QueueError> {
    serde_json::to_string(items).map_err(|e| QueueError::Encode(e.to_string()))
}
