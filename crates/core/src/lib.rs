pub mod config;
pub mod context;
pub mod error;
pub mod properties;
pub mod resource;
pub mod result;
pub mod retry;
pub mod source;

pub use config::IngestConfig;
pub use context::CallContext;
pub use error::*;
pub use properties::*;
pub use resource::ResourceUri;
pub use result::*;
pub use retry::RetryPolicy;
pub use source::*;
