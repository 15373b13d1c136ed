pub mod azure;
pub mod error;
pub mod message;
pub mod producer;

pub use azure::AzureQueueProducer;
pub use error::QueueError;
pub use message::{IngestionMessage, StatusTableRef};
pub use producer::QueueProducer;
