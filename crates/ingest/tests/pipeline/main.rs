//! End-to-end tests of the ingestion strategies against in-memory fakes.
//!
//! Nothing here talks to a real cluster. Time-based tests run on a paused
//! tokio clock, so backoff waits are exact and instant.

mod common;
mod managed;
mod queued;
mod status;
