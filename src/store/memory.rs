use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, ScribeError};
use crate::job::JobId;

use super::{chunk_key, ChunkRef, ChunkStore};

/// Process-local store, used for single-run CLI jobs and tests.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<(JobId, usize), Vec<u8>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, job_id: JobId, index: usize, bytes: Vec<u8>) -> Result<ChunkRef> {
        let mut chunks = self.chunks.write().await;
        if chunks.contains_key(&(job_id, index)) {
            return Err(ScribeError::ChunkExists { job_id, index });
        }
        let size_bytes = bytes.len();
        chunks.insert((job_id, index), bytes);
        Ok(ChunkRef {
            job_id,
            index,
            key: chunk_key(job_id, index),
            size_bytes,
        })
    }

    async fn get(&self, chunk: &ChunkRef) -> Result<Vec<u8>> {
        self.chunks
            .read()
            .await
            .get(&(chunk.job_id, chunk.index))
            .cloned()
            .ok_or_else(|| ScribeError::Storage(format!("chunk {} not found", chunk.key)))
    }

    async fn delete_all(&self, job_id: JobId) -> usize {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|(id, _), _| *id != job_id);
        let deleted = before - chunks.len();
        debug!(job_id = %job_id, deleted, "Deleted chunks from memory");
        deleted
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryChunkStore::new();
        let job = JobId::new();

        let chunk = store.put(job, 0, vec![1, 2, 3]).await.unwrap();
        assert_eq!(chunk.size_bytes, 3);
        assert_eq!(store.get(&chunk).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_put_rejected() {
        let store = MemoryChunkStore::new();
        let job = JobId::new();

        store.put(job, 4, vec![1]).await.unwrap();
        let result = store.put(job, 4, vec![2]).await;
        assert!(matches!(result, Err(ScribeError::ChunkExists { index: 4, .. })));

        let chunk = ChunkRef {
            job_id: job,
            index: 4,
            key: chunk_key(job, 4),
            size_bytes: 1,
        };
        assert_eq!(store.get(&chunk).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_delete_all_scoped_and_idempotent() {
        let store = MemoryChunkStore::new();
        let job = JobId::new();
        let other = JobId::new();

        store.put(job, 0, vec![0]).await.unwrap();
        store.put(job, 1, vec![1]).await.unwrap();
        let kept = store.put(other, 0, vec![9]).await.unwrap();

        assert_eq!(store.delete_all(job).await, 2);
        assert_eq!(store.delete_all(job).await, 0);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&kept).await.unwrap(), vec![9]);
    }
}
