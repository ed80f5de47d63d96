pub mod local;
pub mod memory;
pub mod object;

pub use local::LocalChunkStore;
pub use memory::MemoryChunkStore;
pub use object::ObjectChunkStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, StorageBackend};
use crate::error::{Result, ScribeError};
use crate::job::JobId;

/// Handle to a stored segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub job_id: JobId,
    pub index: usize,
    pub key: String,
    pub size_bytes: usize,
}

/// Object key for a segment: `{job_id}/chunk-{index:03}.mp3`.
pub fn chunk_key(job_id: JobId, index: usize) -> String {
    format!("{}chunk-{:03}.mp3", job_prefix(job_id), index)
}

/// Prefix shared by every chunk of a job.
pub fn job_prefix(job_id: JobId) -> String {
    format!("{job_id}/")
}

/// Durable home for encoded segments between encoding and transcription.
///
/// Keys are write-once: `put` on an existing `(job_id, index)` fails with
/// [`ScribeError::ChunkExists`]. A chunk is either fully visible to `get`
/// or absent.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn put(&self, job_id: JobId, index: usize, bytes: Vec<u8>) -> Result<ChunkRef>;

    async fn get(&self, chunk: &ChunkRef) -> Result<Vec<u8>>;

    /// Delete every chunk of a job. Per-item failures are logged and skipped;
    /// returns how many chunks were removed. Safe to call repeatedly.
    async fn delete_all(&self, job_id: JobId) -> usize;

    fn name(&self) -> &'static str;
}

/// Build the chunk store selected in the configuration.
pub fn create_store(config: &Config) -> Result<Arc<dyn ChunkStore>> {
    match config.storage {
        StorageBackend::Memory => Ok(Arc::new(MemoryChunkStore::new())),
        StorageBackend::Local => {
            let dir = config.storage_dir();
            Ok(Arc::new(LocalChunkStore::new(dir)))
        }
        StorageBackend::Object => {
            let url = config.object_store_url.as_ref().ok_or_else(|| {
                ScribeError::Config(
                    "Object store URL not set. Set CHUNKSCRIBE_OBJECT_STORE_URL.".to_string(),
                )
            })?;
            let mut store = ObjectChunkStore::new(url.clone(), config.bucket.clone());
            if let Some(ref key) = config.object_store_key {
                store = store.with_api_key(key.clone());
            }
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_layout() {
        let id: JobId = "6f1c2d3e-0000-4000-8000-000000000001".parse().unwrap();
        assert_eq!(
            chunk_key(id, 7),
            "6f1c2d3e-0000-4000-8000-000000000001/chunk-007.mp3"
        );
        assert_eq!(
            chunk_key(id, 1234),
            "6f1c2d3e-0000-4000-8000-000000000001/chunk-1234.mp3"
        );
        assert!(chunk_key(id, 0).starts_with(&job_prefix(id)));
    }

    #[test]
    fn test_create_store_from_config() {
        let mut config = Config::default();
        config.storage = StorageBackend::Memory;
        assert_eq!(create_store(&config).unwrap().name(), "memory");

        config.storage = StorageBackend::Object;
        config.object_store_url = None;
        assert!(create_store(&config).is_err());

        config.object_store_url = Some("http://localhost:9000/storage/v1".to_string());
        assert_eq!(create_store(&config).unwrap().name(), "object");
    }
}
