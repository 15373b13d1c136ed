use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use kingest_core::{CallContext, IngestError, IngestionProperties, IngestionResult, IngestionSource};

/// One ingestion strategy. Every call consumes its source and yields exactly
/// one result.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(
        &self,
        source: IngestionSource,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<IngestionResult, IngestError>;
}

#[async_trait]
impl<T: Ingestor + ?Sized> Ingestor for Arc<T> {
    async fn ingest(
        &self,
        source: IngestionSource,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<IngestionResult, IngestError> {
        (**self).ingest(source, props, ctx).await
    }
}

/// Ingest every source concurrently. Results come back in input order and a
/// failure never cancels its siblings.
pub async fn ingest_many<I: Ingestor + ?Sized>(
    ingestor: &I,
    sources: Vec<IngestionSource>,
    props: &IngestionProperties,
    ctx: &CallContext,
) -> Vec<Result<IngestionResult, IngestError>> {
    join_all(
        sources
            .into_iter()
            .map(|source| ingestor.ingest(source, props, ctx)),
    )
    .await
}
