pub mod registry;

pub use registry::{JobRegistry, RecordResult};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::SegmentRange;
use crate::merge::{MergedTranscript, TimedPhrase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything known about a job at creation time.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_filename: String,
    pub total_duration: Duration,
    pub total_size_bytes: u64,
    pub segments: Vec<SegmentRange>,
}

/// Terminal result of one segment: recognized text or the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentOutcome {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
    pub error: Option<String>,
    /// Phrase timings relative to the segment start.
    pub phrases: Vec<TimedPhrase>,
    pub language: Option<String>,
}

impl SegmentOutcome {
    pub fn success(range: &SegmentRange, text: impl Into<String>) -> Self {
        Self {
            index: range.index,
            start: range.start,
            end: range.end,
            text: text.into(),
            error: None,
            phrases: Vec::new(),
            language: None,
        }
    }

    pub fn failure(range: &SegmentRange, error: impl Into<String>) -> Self {
        Self {
            index: range.index,
            start: range.start,
            end: range.end,
            text: String::new(),
            error: Some(error.into()),
            phrases: Vec::new(),
            language: None,
        }
    }

    pub fn with_phrases(mut self, phrases: Vec<TimedPhrase>) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Snapshot of a job as held by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub original_filename: String,
    pub total_duration: Duration,
    pub total_size_bytes: u64,
    pub segments: Vec<SegmentRange>,
    pub completed_segments: usize,
    pub status: JobStatus,
    pub outcomes: BTreeMap<usize, SegmentOutcome>,
    pub transcript: Option<MergedTranscript>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Job {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> Option<&SegmentRange> {
        self.segments.get(index)
    }

    /// Merged text, available once the job has completed.
    pub fn transcription_text(&self) -> Option<&str> {
        self.transcript.as_ref().map(|t| t.full_text.as_str())
    }

    pub fn progress(&self) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        self.completed_segments as f64 / self.segments.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_failure_outcome_has_empty_text() {
        let range = SegmentRange {
            index: 2,
            start: Duration::from_secs(20),
            end: Duration::from_secs(30),
        };
        let outcome = SegmentOutcome::failure(&range, "timeout");
        assert!(!outcome.is_success());
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.index, 2);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
    }
}
