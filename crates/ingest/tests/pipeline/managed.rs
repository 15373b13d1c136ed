//! Managed streaming: strategy choice, retry ceiling and fallback.

use std::io::{Cursor, Write};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kingest_core::{
    CallContext, IngestError, IngestionProperties, IngestionSource, RetryPolicy, Strategy,
};
use kingest_ingest::{ingest_many, Ingestor};

use crate::common::{
    bad_request, streaming_disabled, test_config, throttled, Harness, StalledReader,
};

const MIB: u64 = 1024 * 1024;

fn props() -> IngestionProperties {
    IngestionProperties::new("db", "logs")
}

fn small_stream(len: usize) -> IngestionSource {
    IngestionSource::stream(Cursor::new(vec![b'a'; len]))
}

#[tokio::test(start_paused = true)]
async fn test_small_stream_is_streamed_once() {
    let h = Harness::new(test_config(3, 4 * MIB));

    let result = h
        .managed
        .ingest(small_stream(10 * 1024), &props(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Streaming);
    assert_eq!(result.streaming_attempts, 1);
    assert_eq!(h.endpoint.calls(), 1);
    assert_eq!(h.endpoint.posts.lock().unwrap()[0].body.len(), 10 * 1024);
    assert_eq!(h.producer.count(), 0);
    assert_eq!(h.fetcher.calls(), 0, "streaming never needs ingestion resources");
}

#[tokio::test(start_paused = true)]
async fn test_declared_oversize_goes_straight_to_queue() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let source = small_stream(64).with_raw_size(5 * MIB);

    let result = h
        .managed
        .ingest(source, &props(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Queued);
    assert_eq!(result.streaming_attempts, 0);
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.producer.count(), 1);
    assert_eq!(h.producer.messages()[0].raw_data_size, 5 * MIB);
}

#[tokio::test]
async fn test_large_file_is_queued_under_deterministic_name() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&vec![b'x'; (10 * MIB) as usize]).unwrap();
    drop(file);

    let id = Uuid::new_v4();
    let source = IngestionSource::file(&path).with_id(id);
    let result = h
        .managed
        .ingest(source, &props(), &CallContext::new())
        .await
        .unwrap();

    let expected = format!("db__logs__{id}__events.csv");
    assert_eq!(result.strategy, Strategy::Queued);
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.factory.object_names().await, vec![expected.clone()]);

    let blob_uri = result.blob_uri.unwrap();
    assert!(blob_uri.ends_with(&expected));
    assert!(!blob_uri.contains('?'), "results never carry the SAS");

    let message = &h.producer.messages()[0];
    assert!(message.blob_path.contains("sig=c"));
    assert_eq!(message.raw_data_size, 10 * MIB);
    assert_eq!(message.id, id);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_twice_then_streams() {
    let h = Harness::new(test_config(4, 4 * MIB));
    h.endpoint.fail_with([throttled(), throttled()]);

    let start = Instant::now();
    let result = h
        .managed
        .ingest(small_stream(128), &props(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Streaming);
    assert_eq!(result.streaming_attempts, 3);
    assert_eq!(h.endpoint.calls(), 3);
    assert_eq!(h.producer.count(), 0);
    // 100 ms then 200 ms of backoff.
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_up_to_ceiling_fall_back() {
    let h = Harness::new(test_config(3, 4 * MIB));
    h.endpoint.fail_with([throttled(), throttled(), throttled()]);

    let result = h
        .managed
        .ingest(small_stream(128), &props(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Queued);
    assert_eq!(result.streaming_attempts, 3);
    assert_eq!(h.endpoint.calls(), 3);
    assert_eq!(h.producer.count(), 1);
    assert_eq!(h.factory.object_names().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_fails_without_delay_or_fallback() {
    let h = Harness::new(test_config(3, 4 * MIB));
    h.endpoint.fail_with([bad_request()]);

    let start = Instant::now();
    let err = h
        .managed
        .ingest(small_stream(128), &props(), &CallContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Service { status: 400, .. }));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(h.endpoint.calls(), 1);
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_is_prompt() {
    let mut config = test_config(5, 4 * MIB);
    config.managed.retry = RetryPolicy::new(5)
        .base_delay(Duration::from_secs(10))
        .with_jitter(false);
    let h = Harness::new(config);
    h.endpoint.fail_with(std::iter::repeat_with(throttled).take(5));

    let token = CancellationToken::new();
    let ctx = CallContext::with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let start = Instant::now();
    let err = h
        .managed
        .ingest(small_stream(128), &props(), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(h.endpoint.calls(), 1);
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_buffering_a_stalled_source() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let token = CancellationToken::new();
    let ctx = CallContext::with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let start = Instant::now();
    let err = h
        .managed
        .ingest(IngestionSource::stream(StalledReader), &props(), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_bounds_a_stalled_source() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));

    let start = Instant::now();
    let err = h
        .managed
        .ingest(IngestionSource::stream(StalledReader), &props(), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Timeout(_)));
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.producer.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_disabled_table_is_remembered() {
    let config = test_config(3, 4 * MIB);
    let ttl = config.managed.streaming_disabled_ttl;
    let h = Harness::new(config);
    h.endpoint.fail_with([streaming_disabled()]);
    let ctx = CallContext::new();

    let first = h.managed.ingest(small_stream(32), &props(), &ctx).await.unwrap();
    assert_eq!(first.strategy, Strategy::Queued);
    assert_eq!(first.streaming_attempts, 1);

    let second = h.managed.ingest(small_stream(32), &props(), &ctx).await.unwrap();
    assert_eq!(second.strategy, Strategy::Queued);
    assert_eq!(second.streaming_attempts, 0);
    assert_eq!(h.endpoint.calls(), 1, "memoized table skips streaming");

    // Other tables are unaffected.
    let other = IngestionProperties::new("db", "metrics");
    let third = h.managed.ingest(small_stream(32), &other, &ctx).await.unwrap();
    assert_eq!(third.strategy, Strategy::Streaming);

    tokio::time::advance(ttl + Duration::from_secs(1)).await;
    let fourth = h.managed.ingest(small_stream(32), &props(), &ctx).await.unwrap();
    assert_eq!(fourth.strategy, Strategy::Streaming);
    assert_eq!(h.endpoint.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_blob_reference_is_queued_without_staging() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let blob = "https://other.blob.core.windows.net/in/data.csv.gz?sv=1&sig=b";

    let result = h
        .managed
        .ingest(IngestionSource::blob(blob), &props(), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(result.strategy, Strategy::Queued);
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.factory.lookups(), 0);
    assert_eq!(h.producer.messages()[0].blob_path, blob);
}

#[tokio::test(start_paused = true)]
async fn test_ingest_many_keeps_input_order() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let sources = vec![
        small_stream(10).with_id(ids[0]),
        small_stream(10).with_id(ids[1]).with_raw_size(8 * MIB),
        small_stream(10).with_id(ids[2]),
        IngestionSource::blob("https://other.blob.core.windows.net/in/x.csv?sig=b").with_id(ids[3]),
    ];

    let results = ingest_many(&h.managed, sources, &props(), &CallContext::new()).await;

    let got: Vec<(Uuid, Strategy)> = results
        .into_iter()
        .map(|r| {
            let r = r.unwrap();
            (r.source_id, r.strategy)
        })
        .collect();
    assert_eq!(
        got,
        vec![
            (ids[0], Strategy::Streaming),
            (ids[1], Strategy::Queued),
            (ids[2], Strategy::Streaming),
            (ids[3], Strategy::Queued),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ingest_many_reports_failures_in_place() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("never-written.csv");
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let sources = vec![
        small_stream(10).with_id(ids[0]),
        IngestionSource::file(&missing).with_id(ids[1]),
        small_stream(10).with_id(ids[2]),
    ];

    let results = ingest_many(&h.managed, sources, &props(), &CallContext::new()).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().source_id, ids[0]);
    assert!(matches!(&results[1], Err(IngestError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound));
    assert_eq!(results[2].as_ref().unwrap().source_id, ids[2]);
    assert_eq!(h.endpoint.calls(), 2);
    assert_eq!(h.producer.count(), 0, "a missing file never falls back");
}

#[tokio::test(start_paused = true)]
async fn test_invalid_properties_touch_nothing() {
    let h = Harness::new(test_config(3, 4 * MIB));
    let err = h
        .managed
        .ingest(small_stream(10), &IngestionProperties::new("db", ""), &CallContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::InvalidProperties(_)));
    assert_eq!(h.endpoint.calls(), 0);
    assert_eq!(h.producer.count(), 0);
}
