//! Queued ingestion: staging, message contents and shared discovery.

use std::io::Cursor;

use uuid::Uuid;

use kingest_core::{CallContext, DataFormat, IngestError, IngestionProperties, IngestionSource};
use kingest_ingest::{ingest_many, Ingestor};

use crate::common::{permission_denied, test_config, Harness, QUEUE};

fn stream(data: &[u8]) -> IngestionSource {
    IngestionSource::stream(Cursor::new(data.to_vec()))
}

#[tokio::test(start_paused = true)]
async fn test_message_carries_target_and_auth_context() {
    let h = Harness::new(test_config(3, 1024));
    let props = IngestionProperties::new("db", "events")
        .with_format(DataFormat::Json)
        .with_mapping("events_map")
        .with_flush_immediately(true)
        .with_property("creationTime", "2026-10-14T00:00:00Z");
    let id = Uuid::new_v4();

    let result = h
        .queued
        .ingest(stream(b"{\"a\":1}\n").with_id(id), &props, &CallContext::new())
        .await
        .unwrap();
    assert!(!result.is_streamed());
    assert_eq!(result.source_id, id);

    let sent = h.producer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "https://acct.queue.core.windows.net/ready");
    assert!(QUEUE.starts_with(&sent[0].0));

    let message = &h.producer.messages()[0];
    assert_eq!(message.id, id);
    assert_eq!(message.database_name, "db");
    assert_eq!(message.table_name, "events");
    assert!(message.flush_immediately);
    assert_eq!(message.raw_data_size, 8);
    let extra = &message.additional_properties;
    assert_eq!(extra["format"], "json");
    assert_eq!(extra["ingestionMappingReference"], "events_map");
    assert_eq!(extra["authorizationContext"], "identity-token");
    assert_eq!(extra["creationTime"], "2026-10-14T00:00:00Z");
    assert!(message.ingestion_status_in_table.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_staging_retry_reuses_blob_name() {
    let h = Harness::with_staging_failures(test_config(3, 1024), 1);
    let id = Uuid::new_v4();
    let props = IngestionProperties::new("db", "logs");

    h.queued
        .ingest(stream(b"a,b\n").with_id(id), &props, &CallContext::new())
        .await
        .unwrap();

    assert_eq!(h.factory.lookups(), 2);
    let names = h.factory.object_names().await;
    assert_eq!(names, vec![format!("db__logs__{id}__stream.csv")]);
    assert_eq!(h.producer.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_staging_gives_up_after_budget() {
    let h = Harness::with_staging_failures(test_config(3, 1024), usize::MAX);

    let err = h
        .queued
        .ingest(stream(b"a\n"), &IngestionProperties::new("db", "logs"), &CallContext::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::RetriesExhausted {
            operation: "stage",
            attempts: 3,
            ..
        }
    ));
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_container_sas_is_not_retried() {
    let h = Harness::with_staging_error(test_config(3, 1024), usize::MAX, permission_denied);

    let err = h
        .queued
        .ingest(stream(b"a\n"), &IngestionProperties::new("db", "logs"), &CallContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Unauthorized(_)));
    assert_eq!(h.factory.lookups(), 1);
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ingests_share_one_discovery() {
    let h = Harness::new(test_config(3, 1024));
    let sources = (0..8).map(|i| stream(format!("{i}\n").as_bytes())).collect();

    let results = ingest_many(
        &*h.queued,
        sources,
        &IngestionProperties::new("db", "logs"),
        &CallContext::new(),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.producer.count(), 8);
    assert_eq!(h.factory.object_names().await.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_call_stages_nothing() {
    let h = Harness::new(test_config(3, 1024));
    let ctx = CallContext::new();
    ctx.cancellation_token().cancel();

    let err = h
        .queued
        .ingest(stream(b"a\n"), &IngestionProperties::new("db", "logs"), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(h.factory.lookups(), 0);
    assert_eq!(h.producer.count(), 0);
}
