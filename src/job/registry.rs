use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, ScribeError};
use crate::merge::merge;

use super::{Job, JobId, JobStatus, NewJob, SegmentOutcome};

/// What happened when an outcome was handed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    /// First outcome for this index; `finished` is set when it was the last one.
    Recorded { completed: usize, finished: bool },
    /// An outcome for this index was already recorded and is kept.
    Duplicate,
}

/// A job removed by the idle sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweptJob {
    pub id: JobId,
    /// Whether the job's stored chunks were never purged.
    pub needs_chunk_cleanup: bool,
}

struct Entry {
    job: Job,
    chunks_purged: bool,
}

/// Keyed store of job state, shared by every in-flight job.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a planned job. Segment indices must be `0..n` with no gaps.
    pub async fn create(&self, new_job: NewJob) -> Result<JobId> {
        if new_job.segments.is_empty() {
            return Err(ScribeError::Planning("job has no segments".to_string()));
        }
        for (expected, segment) in new_job.segments.iter().enumerate() {
            if segment.index != expected {
                return Err(ScribeError::Planning(format!(
                    "segment indices must be contiguous: expected {expected}, found {}",
                    segment.index
                )));
            }
        }

        let id = JobId::new();
        let now = Utc::now();
        let job = Job {
            id,
            original_filename: new_job.original_filename,
            total_duration: new_job.total_duration,
            total_size_bytes: new_job.total_size_bytes,
            segments: new_job.segments,
            completed_segments: 0,
            status: JobStatus::Pending,
            outcomes: BTreeMap::new(),
            transcript: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        };

        info!(
            job_id = %id,
            segments = job.segments.len(),
            "Created job for {}",
            job.original_filename
        );

        self.jobs.write().await.insert(
            id,
            Entry {
                job,
                chunks_purged: false,
            },
        );
        Ok(id)
    }

    /// Snapshot of the job. Counts as an access for the idle sweep.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        entry.job.last_accessed = Utc::now();
        Ok(entry.job.clone())
    }

    pub async fn contains(&self, id: JobId) -> bool {
        self.jobs.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Move a pending job to processing when its first segment is dispatched.
    pub async fn mark_dispatched(&self, id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        let now = Utc::now();
        if entry.job.status == JobStatus::Pending {
            entry.job.status = JobStatus::Processing;
            entry.job.updated_at = now;
            debug!(job_id = %id, "Job processing");
        }
        entry.job.last_accessed = now;
        Ok(())
    }

    /// Record the terminal outcome of one segment.
    ///
    /// Idempotent per `(id, index)`: a second call for the same index leaves
    /// the job untouched. When the last outcome arrives, the outcomes are
    /// merged in index order and the job becomes `completed`, or `failed` if
    /// no segment succeeded.
    pub async fn record_segment_outcome(
        &self,
        id: JobId,
        index: usize,
        mut outcome: SegmentOutcome,
    ) -> Result<RecordResult> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        let job = &mut entry.job;

        let range = *job.segments.get(index).ok_or(ScribeError::SegmentOutOfRange {
            job_id: id,
            index,
            segment_count: job.segments.len(),
        })?;

        let now = Utc::now();
        job.last_accessed = now;

        if job.outcomes.contains_key(&index) {
            debug!(job_id = %id, index, "Ignoring duplicate segment outcome");
            return Ok(RecordResult::Duplicate);
        }

        // the plan is authoritative for placement
        outcome.index = index;
        outcome.start = range.start;
        outcome.end = range.end;

        if let Some(ref error) = outcome.error {
            warn!(job_id = %id, index, "Segment failed: {}", error);
        }

        job.outcomes.insert(index, outcome);
        job.completed_segments = job.outcomes.len();
        job.updated_at = now;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
        }

        let finished = job.completed_segments == job.segments.len();
        if finished && !job.status.is_terminal() {
            let merged = merge(job.outcomes.values().cloned().collect());
            if merged.success_count > 0 {
                info!(
                    job_id = %id,
                    succeeded = merged.success_count,
                    failed = merged.failure_count,
                    "Job completed"
                );
                job.status = JobStatus::Completed;
                job.transcript = Some(merged);
            } else {
                let errors: Vec<String> = merged
                    .errors()
                    .map(|(i, e)| format!("segment {i}: {e}"))
                    .collect();
                let message = format!(
                    "All {} segments failed. Errors: {}",
                    merged.total_segments,
                    errors.join("; ")
                );
                warn!(job_id = %id, "{}", message);
                job.status = JobStatus::Failed;
                job.error_message = Some(message);
            }
        }

        Ok(RecordResult::Recorded {
            completed: job.completed_segments,
            finished,
        })
    }

    /// Mark a job as failed. A job that already reached a terminal state keeps it.
    pub async fn fail(&self, id: JobId, message: impl Into<String>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(ScribeError::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(());
        }
        let message = message.into();
        warn!(job_id = %id, "Job failed: {}", message);
        let now = Utc::now();
        entry.job.status = JobStatus::Failed;
        entry.job.error_message = Some(message);
        entry.job.updated_at = now;
        entry.job.last_accessed = now;
        Ok(())
    }

    /// Returns `true` exactly once per job: the caller that gets `true` owns
    /// deleting the job's stored chunks.
    pub async fn claim_chunk_cleanup(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(entry) if !entry.chunks_purged => {
                entry.chunks_purged = true;
                true
            }
            _ => false,
        }
    }

    /// Forget a job. Returns the final snapshot and whether its chunks still
    /// need deleting.
    pub async fn remove(&self, id: JobId) -> Result<(Job, bool)> {
        let entry = self
            .jobs
            .write()
            .await
            .remove(&id)
            .ok_or(ScribeError::JobNotFound(id))?;
        Ok((entry.job, !entry.chunks_purged))
    }

    /// Remove jobs not accessed within `max_idle`.
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<SweptJob> {
        self.sweep_idle_at(Utc::now(), max_idle).await
    }

    pub async fn sweep_idle_at(&self, now: DateTime<Utc>, max_idle: Duration) -> Vec<SweptJob> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.jobs.write().await;

        let idle: Vec<JobId> = jobs
            .iter()
            .filter(|(_, entry)| now.signed_duration_since(entry.job.last_accessed) > max_idle)
            .map(|(id, _)| *id)
            .collect();

        let mut swept: Vec<SweptJob> = idle
            .into_iter()
            .filter_map(|id| {
                jobs.remove(&id).map(|entry| SweptJob {
                    id,
                    needs_chunk_cleanup: !entry.chunks_purged,
                })
            })
            .collect();
        swept.sort_by_key(|s| s.id);

        if !swept.is_empty() {
            info!("Swept {} idle job(s)", swept.len());
        }
        swept
    }
}
