pub mod backend;
pub mod error;
pub mod stager;

pub use backend::{AzureStoreFactory, StoreFactory};
pub use error::StorageError;
pub use stager::{staged_blob_name, BlobStager, StagedBlob};
