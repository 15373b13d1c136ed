//! Table status reporting for queued ingestions.

use std::io::Cursor;
use std::time::Duration;

use uuid::Uuid;

use kingest_core::{
    CallContext, IngestionProperties, IngestionSource, ReportLevel, ReportMethod, RetryPolicy,
};
use kingest_ingest::{Ingestor, StatusReporter, StatusState};

use crate::common::{test_config, Harness, TABLE};

fn table_props() -> IngestionProperties {
    IngestionProperties::new("db", "logs")
        .with_report(ReportLevel::FailuresAndSuccesses, ReportMethod::Table)
}

fn reporter(h: &Harness) -> StatusReporter {
    StatusReporter::new(h.resources.clone(), h.status.clone(), Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn test_pending_row_written_before_enqueue() {
    let h = Harness::new(test_config(3, 1024));
    let id = Uuid::new_v4();
    let source = IngestionSource::stream(Cursor::new(b"a\n".to_vec())).with_id(id);

    let result = h
        .queued
        .ingest(source, &table_props(), &CallContext::new())
        .await
        .unwrap();

    let handle = result.status.expect("table reporting yields a handle");
    assert_eq!(handle.source_id, id);
    assert!(TABLE.starts_with(handle.table.base()));

    let rows = h.status.rows.lock().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, StatusState::Pending);
    assert_eq!(rows[0].partition_key, id.to_string());
    assert!(!rows[0].source_path.contains('?'));

    let message = &h.producer.messages()[0];
    let status_ref = message.ingestion_status_in_table.as_ref().unwrap();
    assert_eq!(status_ref.row_key, id.to_string());
    assert!(status_ref.table_connection_string.contains("sig=t"));
    assert_eq!(message.report_method, ReportMethod::Table.code());
}

#[tokio::test(start_paused = true)]
async fn test_queue_reporting_writes_no_row() {
    let h = Harness::new(test_config(3, 1024));
    let source = IngestionSource::stream(Cursor::new(b"a\n".to_vec()));

    let result = h
        .queued
        .ingest(source, &IngestionProperties::new("db", "logs"), &CallContext::new())
        .await
        .unwrap();

    assert!(result.status.is_none());
    assert!(h.status.rows.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_waits_for_terminal_state() {
    let h = Harness::new(test_config(3, 1024));
    let source = IngestionSource::stream(Cursor::new(b"a\n".to_vec()));
    let result = h
        .queued
        .ingest(source, &table_props(), &CallContext::new())
        .await
        .unwrap();
    let handle = result.status.unwrap();

    let table = h.status.clone();
    let id = handle.source_id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        table.update(id, |row| row.status = StatusState::Succeeded);
    });

    let policy = RetryPolicy::new(10)
        .base_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(100))
        .with_jitter(false);
    let record = reporter(&h)
        .poll_until_terminal(&handle, &policy, &CallContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StatusState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_poll_returns_last_row_when_budget_runs_out() {
    let h = Harness::new(test_config(3, 1024));
    let source = IngestionSource::stream(Cursor::new(b"a\n".to_vec()));
    let result = h
        .queued
        .ingest(source, &table_props(), &CallContext::new())
        .await
        .unwrap();
    let handle = result.status.unwrap();

    let policy = RetryPolicy::new(3)
        .base_delay(Duration::from_millis(10))
        .with_jitter(false);
    let record = reporter(&h)
        .poll_until_terminal(&handle, &policy, &CallContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StatusState::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_by_id_uses_discovered_table() {
    let h = Harness::new(test_config(3, 1024));
    let reporter = reporter(&h);

    let missing = reporter
        .lookup_id(Uuid::new_v4(), &CallContext::new())
        .await
        .unwrap();
    assert!(missing.is_none());
    assert_eq!(h.fetcher.calls(), 1);
}
