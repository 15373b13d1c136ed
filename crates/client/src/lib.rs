//! Authenticated HTTP transport to the analytics engine.
//!
//! Covers the two request shapes the ingestion pipeline needs: management
//! commands (resource discovery, identity token) and streaming ingest posts.
//! Credential acquisition lives behind [`TokenProvider`].

pub mod auth;
pub mod error;
pub mod transport;
pub mod v1;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use error::ClientError;
pub use transport::{KustoTransport, StreamingPost};
pub use v1::{V1Column, V1Response, V1Table};
