//! Ingestion strategies over the resource, storage and queue crates.
//!
//! - [`QueuedIngestor`] stages data to blob storage and enqueues a message.
//! - [`StreamingIngestor`] posts small payloads straight to the engine.
//! - [`ManagedStreamingIngestor`] tries streaming with retries and falls
//!   back to queued ingestion when streaming cannot take the payload.
//! - [`StatusReporter`] reads per-source status rows for table reporting.

pub mod client;
pub mod ingestor;
pub mod managed;
pub mod payload;
pub mod queued;
pub mod status;
pub mod streaming;

pub use client::IngestClient;
pub use ingestor::{ingest_many, Ingestor};
pub use managed::{transition, FallbackReason, ManagedEvent, ManagedState, ManagedStreamingIngestor};
pub use payload::Payload;
pub use queued::QueuedIngestor;
pub use status::{
    AzureStatusTable, FailureStatus, StatusRecord, StatusReporter, StatusState, StatusTable,
};
pub use streaming::{StreamingEndpoint, StreamingIngestor, Streamer};
