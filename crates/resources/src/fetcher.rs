use async_trait::async_trait;
use tracing::debug;

use kingest_client::KustoTransport;
use kingest_core::IngestError;

use crate::model::IngestionResources;

/// Database the data-management service expects for its own commands.
pub const NET_DEFAULT_DB: &str = "NetDefaultDB";

const GET_RESOURCES: &str = ".get ingestion resources";
const GET_IDENTITY_TOKEN: &str = ".get kusto identity token";

/// Source of fresh resource sets. The cache calls this at most once per
/// refresh.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self) -> Result<IngestionResources, IngestError>;
}

/// Fetches resources with management commands against the ingest endpoint.
pub struct MgmtResourceFetcher {
    transport: KustoTransport,
}

impl MgmtResourceFetcher {
    pub fn new(transport: KustoTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ResourceFetcher for MgmtResourceFetcher {
    async fn fetch(&self) -> Result<IngestionResources, IngestError> {
        let response = self
            .transport
            .execute_mgmt(NET_DEFAULT_DB, GET_RESOURCES)
            .await?;
        let table = response
            .primary()
            .ok_or_else(|| IngestError::Decode("empty ingestion resources response".into()))?;
        let mut resources = IngestionResources::from_v1(table)?;

        let identity = self
            .transport
            .execute_mgmt(NET_DEFAULT_DB, GET_IDENTITY_TOKEN)
            .await?;
        match identity
            .primary()
            .and_then(|t| t.string_at(0, "AuthorizationContext"))
        {
            Some(token) => resources = resources.with_authorization_context(token),
            None => debug!("Identity token response had no AuthorizationContext"),
        }

        debug!(
            containers = resources.containers.len(),
            queues = resources.queues.len(),
            status_table = resources.status_table.is_some(),
            "Fetched ingestion resources"
        );
        Ok(resources)
    }
}
