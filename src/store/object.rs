//! Remote object storage over a Supabase-storage style REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ScribeError};
use crate::job::JobId;

use super::{chunk_key, job_prefix, ChunkRef, ChunkStore};

/// Page size for prefix listings.
const LIST_LIMIT: usize = 1000;

pub struct ObjectChunkStore {
    client: Client,
    base_url: String,
    bucket: String,
    api_key: Option<String>,
}

impl ObjectChunkStore {
    /// `base_url` is the storage API root, e.g. `https://xyz.supabase.co/storage/v1`.
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, self.bucket, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => request
                .header("Authorization", format!("Bearer {key}"))
                .header("apikey", key),
            None => request,
        }
    }

    async fn list_keys(&self, job_id: JobId) -> Result<Vec<String>> {
        let prefix = job_prefix(job_id);
        let mut keys = Vec::new();
        let mut offset = 0;

        loop {
            let request = ListRequest {
                prefix: prefix.trim_end_matches('/'),
                limit: LIST_LIMIT,
                offset,
            };
            let response = self
                .authorize(
                    self.client
                        .post(format!("{}/object/list/{}", self.base_url, self.bucket)),
                )
                .json(&request)
                .send()
                .await
                .map_err(|e| ScribeError::Storage(format!("list {prefix} failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScribeError::Storage(format!(
                    "list {prefix} failed ({status}): {body}"
                )));
            }

            let page: Vec<ListedObject> = response
                .json()
                .await
                .map_err(|e| ScribeError::Storage(format!("bad list response: {e}")))?;
            let page_len = page.len();
            keys.extend(page.into_iter().map(|o| format!("{prefix}{}", o.name)));

            if page_len < LIST_LIMIT {
                break;
            }
            offset += page_len;
        }

        Ok(keys)
    }
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
}

#[async_trait]
impl ChunkStore for ObjectChunkStore {
    async fn put(&self, job_id: JobId, index: usize, bytes: Vec<u8>) -> Result<ChunkRef> {
        let key = chunk_key(job_id, index);
        let size_bytes = bytes.len();

        let response = self
            .authorize(self.client.post(self.object_url(&key)))
            .header("Content-Type", "audio/mpeg")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ScribeError::Storage(format!("upload {key} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT || body.contains("Duplicate") {
                return Err(ScribeError::ChunkExists { job_id, index });
            }
            return Err(ScribeError::Storage(format!(
                "upload {key} failed ({status}): {body}"
            )));
        }

        debug!(job_id = %job_id, index, size_bytes, "Uploaded chunk {}", key);

        Ok(ChunkRef {
            job_id,
            index,
            key,
            size_bytes,
        })
    }

    async fn get(&self, chunk: &ChunkRef) -> Result<Vec<u8>> {
        let response = self
            .authorize(self.client.get(self.object_url(&chunk.key)))
            .send()
            .await
            .map_err(|e| ScribeError::Storage(format!("download {} failed: {e}", chunk.key)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScribeError::Storage(format!(
                "download {} failed ({status}): {body}",
                chunk.key
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScribeError::Storage(format!("download {} failed: {e}", chunk.key)))?;
        Ok(bytes.to_vec())
    }

    async fn delete_all(&self, job_id: JobId) -> usize {
        let keys = match self.list_keys(job_id).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(job_id = %job_id, "Cannot list chunks for cleanup: {}", e);
                return 0;
            }
        };

        let mut deleted = 0;
        for key in keys {
            let result = self
                .authorize(self.client.delete(self.object_url(&key)))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => deleted += 1,
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    debug!("Chunk {} already gone", key);
                }
                Ok(response) => {
                    warn!(job_id = %job_id, "Failed to delete {} ({})", key, response.status());
                }
                Err(e) => warn!(job_id = %job_id, "Failed to delete {}: {}", key, e),
            }
        }

        debug!(job_id = %job_id, deleted, "Deleted chunks from bucket {}", self.bucket);
        deleted
    }

    fn name(&self) -> &'static str {
        "object"
    }
}
