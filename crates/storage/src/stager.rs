use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kingest_core::ResourceUri;

use crate::backend::StoreFactory;
use crate::error::StorageError;

/// A blob written to a staging container.
#[derive(Debug, Clone)]
pub struct StagedBlob {
    /// Blob URI including the container SAS; what the service reads.
    pub uri: String,
    pub name: String,
    pub size: u64,
}

/// `{database}__{table}__{source_id}__{name}`.
///
/// Deterministic, so a retried upload of the same source overwrites the
/// blob from the failed attempt.
pub fn staged_blob_name(database: &str, table: &str, source_id: Uuid, name: &str) -> String {
    format!("{database}__{table}__{source_id}__{name}")
}

/// Uploads sources into staging containers.
pub struct BlobStager {
    factory: Arc<dyn StoreFactory>,
    chunk_bytes: usize,
}

impl BlobStager {
    pub fn new(factory: Arc<dyn StoreFactory>, chunk_bytes: usize) -> Self {
        Self {
            factory,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    /// Single-request upload of an in-memory payload.
    pub async fn stage_bytes(
        &self,
        container: &ResourceUri,
        name: &str,
        data: Bytes,
    ) -> Result<StagedBlob, StorageError> {
        let store = self.factory.store_for(container)?;
        let size = data.len() as u64;
        store.put(&ObjectPath::from(name), data.into()).await?;
        debug!(container = %container, blob = name, size, "Staged payload");
        Ok(staged(container, name, size))
    }

    /// Multipart upload of a local file, read in `chunk_bytes` pieces.
    pub async fn stage_file(
        &self,
        container: &ResourceUri,
        name: &str,
        file: &Path,
    ) -> Result<StagedBlob, StorageError> {
        let store = self.factory.store_for(container)?;
        let mut reader = tokio::fs::File::open(file).await?;
        let upload = store.put_multipart(&ObjectPath::from(name)).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.chunk_bytes);

        let mut buf = vec![0u8; self.chunk_bytes];
        let mut size = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    if let Err(abort) = writer.abort().await {
                        warn!(blob = name, error = %abort, "Failed to abort multipart upload");
                    }
                    return Err(e.into());
                }
            };
            writer.wait_for_capacity(2).await?;
            writer.write(&buf[..n]);
            size += n as u64;
        }
        writer.finish().await?;

        info!(
            container = %container,
            blob = name,
            file = %file.display(),
            size,
            "Staged file"
        );
        Ok(staged(container, name, size))
    }
}

fn staged(container: &ResourceUri, name: &str, size: u64) -> StagedBlob {
    StagedBlob {
        uri: container.authorized_child(name),
        name: name.to_string(),
        size,
    }
}
