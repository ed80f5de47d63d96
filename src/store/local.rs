use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, ScribeError};
use crate::job::JobId;

use super::{chunk_key, ChunkRef, ChunkStore};

/// Filesystem store laid out as `{base}/{job_id}/chunk-NNN.mp3`.
///
/// Writes go to a temp file in the job directory and are linked into place
/// without clobbering, so a chunk is either complete or absent.
#[derive(Debug, Clone)]
pub struct LocalChunkStore {
    base_dir: PathBuf,
}

impl LocalChunkStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.base_dir.join(job_id.to_string())
    }

    fn chunk_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

fn write_no_clobber(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn put(&self, job_id: JobId, index: usize, bytes: Vec<u8>) -> Result<ChunkRef> {
        let key = chunk_key(job_id, index);
        let dir = self.job_dir(job_id);
        let target = self.chunk_path(&key);
        let size_bytes = bytes.len();

        fs::create_dir_all(&dir).await.map_err(|e| {
            ScribeError::Storage(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let write_target = target.clone();
        let written =
            tokio::task::spawn_blocking(move || write_no_clobber(&dir, &write_target, &bytes))
                .await
                .map_err(|e| ScribeError::Storage(format!("chunk write task failed: {e}")))?;

        match written {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ScribeError::ChunkExists { job_id, index });
            }
            Err(e) => {
                return Err(ScribeError::Storage(format!(
                    "Failed to write {}: {e}",
                    target.display()
                )));
            }
        }

        debug!(job_id = %job_id, index, size_bytes, "Stored chunk at {}", target.display());

        Ok(ChunkRef {
            job_id,
            index,
            key,
            size_bytes,
        })
    }

    async fn get(&self, chunk: &ChunkRef) -> Result<Vec<u8>> {
        let path = self.chunk_path(&chunk.key);
        fs::read(&path)
            .await
            .map_err(|e| ScribeError::Storage(format!("Failed to read {}: {e}", path.display())))
    }

    async fn delete_all(&self, job_id: JobId) -> usize {
        let dir = self.job_dir(job_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(job_id = %job_id, "Failed to list {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut deleted = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(job_id = %job_id, "Failed to read entry in {}: {}", dir.display(), e);
                    break;
                }
            };

            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    let is_chunk = entry
                        .file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with("chunk-"));
                    if is_chunk {
                        deleted += 1;
                    }
                }
                Err(e) => warn!(job_id = %job_id, "Failed to remove {}: {}", path.display(), e),
            }
        }

        if let Err(e) = fs::remove_dir(&dir).await {
            warn!(job_id = %job_id, "Failed to remove {}: {}", dir.display(), e);
        }

        debug!(job_id = %job_id, deleted, "Deleted chunks from {}", dir.display());
        deleted
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_writes_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let job = JobId::new();

        let chunk = store.put(job, 2, b"mp3 bytes".to_vec()).await.unwrap();
        let expected = dir
            .path()
            .join(job.to_string())
            .join("chunk-002.mp3");
        assert!(expected.exists());
        assert_eq!(store.get(&chunk).await.unwrap(), b"mp3 bytes");
    }

    #[tokio::test]
    async fn test_duplicate_put_rejected_and_original_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let job = JobId::new();

        let chunk = store.put(job, 0, b"first".to_vec()).await.unwrap();
        let result = store.put(job, 0, b"second".to_vec()).await;
        assert!(matches!(result, Err(ScribeError::ChunkExists { .. })));
        assert_eq!(store.get(&chunk).await.unwrap(), b"first");

        // no temp files left behind
        let files: Vec<_> = std::fs::read_dir(dir.path().join(job.to_string()))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let job = JobId::new();
        let other = JobId::new();

        for i in 0..3 {
            store.put(job, i, vec![i as u8]).await.unwrap();
        }
        let kept = store.put(other, 0, vec![7]).await.unwrap();

        assert_eq!(store.delete_all(job).await, 3);
        assert!(!dir.path().join(job.to_string()).exists());
        assert_eq!(store.delete_all(job).await, 0);
        assert_eq!(store.get(&kept).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_get_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let job = JobId::new();
        let chunk = ChunkRef {
            job_id: job,
            index: 0,
            key: chunk_key(job, 0),
            size_bytes: 0,
        };
        assert!(matches!(store.get(&chunk).await, Err(ScribeError::Storage(_))));
    }
}
