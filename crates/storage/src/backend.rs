use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::ObjectStore;
use tracing::debug;

use kingest_core::ResourceUri;

use crate::error::StorageError;

/// Produces an object store rooted at a staging container.
pub trait StoreFactory: Send + Sync {
    fn store_for(&self, container: &ResourceUri) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Azure blob stores authorized by the container SAS.
///
/// Stores are reused per container until the SAS changes (after a resource
/// refresh).
#[derive(Default)]
pub struct AzureStoreFactory {
    stores: Mutex<HashMap<String, (String, Arc<dyn ObjectStore>)>>,
}

impl AzureStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(container: &ResourceUri) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if container.sas().is_empty() {
            return Err(StorageError::InvalidUri(format!(
                "{} has no SAS",
                container.base()
            )));
        }
        let store = MicrosoftAzureBuilder::new()
            .with_url(container.base())
            .with_config(AzureConfigKey::SasKey, container.sas())
            .build()?;
        debug!(container = %container, "Built blob store for staging container");
        Ok(Arc::new(store))
    }
}

impl StoreFactory for AzureStoreFactory {
    fn store_for(&self, container: &ResourceUri) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((sas, store)) = stores.get(container.base()) {
            if sas == container.sas() {
                return Ok(store.clone());
            }
        }
        let store = Self::build(container)?;
        stores.insert(
            container.base().to_string(),
            (container.sas().to_string(), store.clone()),
        );
        Ok(store)
    }
}
