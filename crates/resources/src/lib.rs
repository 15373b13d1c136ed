//! Discovery and caching of ingestion resources.
//!
//! The data-management endpoint hands out staging containers, ingestion
//! queues and a status table, each with a time-bounded SAS. [`ResourceCache`]
//! keeps the current set, refreshes it single-flight when it expires, and
//! keeps serving the previous set when a refresh fails.

pub mod cache;
pub mod fetcher;
pub mod model;

pub use cache::ResourceCache;
pub use fetcher::{MgmtResourceFetcher, ResourceFetcher};
pub use model::IngestionResources;
