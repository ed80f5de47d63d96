use std::time::Duration;

use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Unreadable media: {0}")]
    UnreadableMedia(String),

    #[error("No audio track in {0}")]
    NoAudioTrack(String),

    #[error("Segment planning failed: {0}")]
    Planning(String),

    #[error("Segment encoding failed: {0}")]
    Encode(String),

    #[error("Chunk storage failed: {0}")]
    Storage(String),

    #[error("Chunk {index} of job {job_id} already exists")]
    ChunkExists { job_id: JobId, index: usize },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Payload too large: {size} bytes (limit {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Segment {index} out of range for job {job_id} ({segment_count} segments)")]
    SegmentOutOfRange {
        job_id: JobId,
        index: usize,
        segment_count: usize,
    },

    #[error("Job {job_id} already {status}")]
    JobFinished {
        job_id: JobId,
        status: crate::job::JobStatus,
    },

    #[error("Job cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScribeError {
    /// Whether a bounded retry of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScribeError::Encode(_)
            | ScribeError::Storage(_)
            | ScribeError::RateLimited { .. }
            | ScribeError::Io(_) => true,
            ScribeError::Api { status, .. } => *status >= 500,
            ScribeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ScribeError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;
