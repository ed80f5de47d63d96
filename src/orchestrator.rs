//! Drives a job from probe to merged transcript.
//!
//! Each planned segment goes through encode (or passthrough) → store →
//! transcribe on a bounded set of concurrent futures. Outcomes are recorded
//! in the [`JobRegistry`] as they finish and merged there by index once the
//! last one arrives. Stored chunks are deleted on every exit path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ScribeError};
use crate::job::{Job, JobId, JobRegistry, JobStatus, NewJob, RecordResult, SegmentOutcome};
use crate::media::{
    plan_segments, FfmpegEncoder, FfprobeProbe, MediaProbe, SegmentBudget, SegmentEncoder,
    SegmentRange,
};
use crate::merge::MergedTranscript;
use crate::progress::{NoProgress, ProgressObserver, Stage};
use crate::retry::RetryPolicy;
use crate::store::{chunk_key, create_store, ChunkRef, ChunkStore};
use crate::transcribe::{create_transcriber, TranscribeOptions, Transcriber};

/// Floor for the configured sweeper's tick.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Raised to stop dispatching new segment work.
pub type CancelFlag = Arc<AtomicBool>;

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub concurrency: usize,
    pub budget: SegmentBudget,
    pub options: TranscribeOptions,
    pub encode_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub transcribe_retry: RetryPolicy,
    /// Jobs untouched for this long are swept by [`Orchestrator::spawn_configured_sweeper`].
    pub idle_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            budget: config.segment_budget(),
            options: config.transcribe_options(),
            encode_retry: config.encode_retry,
            store_retry: config.store_retry,
            transcribe_retry: config.transcribe_retry,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    /// Merged transcript, possibly with failed segments.
    Completed { transcript: MergedTranscript },
    Failed { message: String },
    Cancelled,
}

/// Summary of one [`Orchestrator::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub original_filename: String,
    pub total_duration: Duration,
    pub segment_count: usize,
    pub passthrough: bool,
    pub chunks_deleted: usize,
    pub elapsed: Duration,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn transcript(&self) -> Option<&MergedTranscript> {
        match self.outcome {
            JobOutcome::Completed { ref transcript } => Some(transcript),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

enum SegmentRun {
    Done(SegmentOutcome),
    /// Unrecoverable failure; the whole job stops.
    Fatal(ScribeError),
    /// Never started because of cancellation or an earlier fatal error.
    Skipped,
}

pub struct Orchestrator {
    probe: Arc<dyn MediaProbe>,
    encoder: Arc<dyn SegmentEncoder>,
    store: Arc<dyn ChunkStore>,
    transcriber: Arc<dyn Transcriber>,
    registry: Arc<JobRegistry>,
    progress: Arc<dyn ProgressObserver>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        encoder: Arc<dyn SegmentEncoder>,
        store: Arc<dyn ChunkStore>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            probe,
            encoder,
            store,
            transcriber,
            registry: Arc::new(JobRegistry::new()),
            progress: Arc::new(NoProgress),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Wire up ffprobe, ffmpeg and the configured store and transcriber.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = create_store(config)?;
        let transcriber: Arc<dyn Transcriber> = Arc::from(create_transcriber(config)?);
        Ok(Self::new(
            Arc::new(FfprobeProbe::new()),
            Arc::new(FfmpegEncoder::new()),
            store,
            transcriber,
        )
        .with_settings(OrchestratorSettings::from_config(config)))
    }

    /// Share a registry with other orchestrators.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Probe and plan `source`, then register a pending job.
    ///
    /// Nothing is registered when probing or planning fails.
    pub async fn create_job(&self, source: &Path) -> Result<JobId> {
        let info = self.probe.probe(source).await?;
        if !info.has_audio {
            return Err(ScribeError::NoAudioTrack(source.display().to_string()));
        }

        let plan = plan_segments(info.duration, info.size_bytes, &self.settings.budget)?;
        debug!(
            segments = plan.len(),
            passthrough = plan.is_passthrough(),
            "Planned {:.1}s of media",
            info.duration.as_secs_f64()
        );

        let original_filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());

        self.registry
            .create(NewJob {
                original_filename,
                total_duration: info.duration,
                total_size_bytes: info.size_bytes,
                segments: plan.segments,
            })
            .await
    }

    /// Run one segment of an existing job and record its outcome.
    ///
    /// Calling it again for an index that already has an outcome returns the
    /// recorded outcome without redoing any work. A storage failure fails the
    /// whole job and purges its chunks.
    pub async fn process_segment(
        &self,
        job_id: JobId,
        source: &Path,
        index: usize,
    ) -> Result<SegmentOutcome> {
        let job = self.registry.get(job_id).await?;
        let range = *job.segment(index).ok_or(ScribeError::SegmentOutOfRange {
            job_id,
            index,
            segment_count: job.segment_count(),
        })?;

        if let Some(existing) = job.outcomes.get(&index) {
            return Ok(existing.clone());
        }
        if job.status.is_terminal() {
            return Err(ScribeError::JobFinished {
                job_id,
                status: job.status,
            });
        }

        self.registry.mark_dispatched(job_id).await?;
        let passthrough = job.segment_count() == 1;
        let percent = overall_percent(job.completed_segments, job.segment_count());

        match self
            .run_segment(job_id, source, &range, passthrough, percent)
            .await
        {
            Ok(outcome) => {
                match self
                    .registry
                    .record_segment_outcome(job_id, index, outcome.clone())
                    .await?
                {
                    RecordResult::Recorded { finished, .. } => {
                        if finished {
                            self.cleanup(job_id).await;
                        }
                        Ok(outcome)
                    }
                    RecordResult::Duplicate => {
                        let job = self.registry.get(job_id).await?;
                        Ok(job.outcomes.get(&index).cloned().unwrap_or(outcome))
                    }
                }
            }
            Err(e) => {
                self.registry.fail(job_id, e.to_string()).await?;
                self.cleanup(job_id).await;
                Err(e)
            }
        }
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<Job> {
        self.registry.get(job_id).await
    }

    /// Forget a job and delete any chunks it still owns.
    pub async fn delete_job(&self, job_id: JobId) -> Result<usize> {
        let (job, needs_cleanup) = self.registry.remove(job_id).await?;
        let deleted = if needs_cleanup {
            self.store.delete_all(job_id).await
        } else {
            0
        };
        info!(job_id = %job_id, status = %job.status, deleted, "Deleted job");
        Ok(deleted)
    }

    /// Delete a job's stored chunks. Only the first call does any work.
    pub async fn cleanup(&self, job_id: JobId) -> usize {
        if !self.registry.claim_chunk_cleanup(job_id).await {
            debug!(job_id = %job_id, "Chunks already purged");
            return 0;
        }
        let deleted = self.store.delete_all(job_id).await;
        debug!(job_id = %job_id, deleted, "Purged chunks from {} store", self.store.name());
        deleted
    }

    /// Remove idle jobs and delete their chunks. Returns the removed ids.
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<JobId> {
        let swept = self.registry.sweep_idle(max_idle).await;
        let mut ids = Vec::with_capacity(swept.len());
        for job in swept {
            if job.needs_chunk_cleanup {
                self.store.delete_all(job.id).await;
            }
            ids.push(job.id);
        }
        ids
    }

    /// Run [`Orchestrator::sweep_idle`] every `interval` until the handle is aborted.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = orchestrator.sweep_idle(max_idle).await;
                if !swept.is_empty() {
                    debug!("Idle sweep removed {} job(s)", swept.len());
                }
            }
        })
    }

    /// Start an idle sweeper driven by `settings.idle_timeout`, checking four
    /// times per timeout period.
    pub fn spawn_configured_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let max_idle = self.settings.idle_timeout;
        let interval = (max_idle / 4).max(MIN_SWEEP_INTERVAL);
        self.spawn_idle_sweeper(interval, max_idle)
    }

    /// Transcribe `source` end to end.
    pub async fn run(&self, source: &Path) -> Result<JobReport> {
        self.run_with_cancel(source, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Transcribe `source` end to end, stopping dispatch when `cancel` is raised.
    ///
    /// Probe and planning errors are returned as `Err` and leave no job
    /// behind. Everything after that is reported through [`JobReport::outcome`].
    pub async fn run_with_cancel(&self, source: &Path, cancel: CancelFlag) -> Result<JobReport> {
        let started = Instant::now();

        self.progress
            .on_progress(Stage::Planning, 0.0, "Probing media");
        let job_id = match self.create_job(source).await {
            Ok(id) => id,
            Err(e) => {
                self.progress.on_progress(Stage::Failed, 0.0, &e.to_string());
                return Err(e);
            }
        };

        let job = self.registry.get(job_id).await?;
        let total = job.segment_count();
        let passthrough = total == 1;
        info!(
            job_id = %job_id,
            segments = total,
            concurrency = self.settings.concurrency,
            "Transcribing {} with {}",
            job.original_filename,
            self.transcriber.name()
        );
        self.progress.on_progress(
            Stage::Planning,
            overall_percent(0, total),
            &format!("Planned {} segment(s)", total),
        );

        let semaphore = Semaphore::new(self.settings.concurrency.max(1));
        let abort = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);

        let mut futures = FuturesUnordered::new();
        for range in job.segments.iter().copied() {
            let (semaphore, abort, completed, cancel) = (&semaphore, &abort, &completed, &cancel);
            futures.push(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (range, SegmentRun::Skipped),
                };
                if cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                    return (range, SegmentRun::Skipped);
                }
                if let Err(e) = self.registry.mark_dispatched(job_id).await {
                    abort.store(true, Ordering::Relaxed);
                    return (range, SegmentRun::Fatal(e));
                }

                let percent = overall_percent(completed.load(Ordering::Relaxed), total);
                match self
                    .run_segment(job_id, source, &range, passthrough, percent)
                    .await
                {
                    Ok(outcome) => (range, SegmentRun::Done(outcome)),
                    Err(e) => {
                        abort.store(true, Ordering::Relaxed);
                        (range, SegmentRun::Fatal(e))
                    }
                }
            });
        }

        let mut fatal: Option<ScribeError> = None;
        let mut skipped = 0;
        while let Some((range, run)) = futures.next().await {
            match run {
                SegmentRun::Done(outcome) => {
                    match self
                        .registry
                        .record_segment_outcome(job_id, range.index, outcome)
                        .await
                    {
                        Ok(_) => {
                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            self.progress.on_progress(
                                Stage::Transcribing,
                                overall_percent(done, total),
                                &format!("Segment {}/{} finished", done, total),
                            );
                        }
                        Err(e) => {
                            abort.store(true, Ordering::Relaxed);
                            fatal.get_or_insert(e);
                        }
                    }
                }
                SegmentRun::Fatal(e) => {
                    warn!(job_id = %job_id, index = range.index, "Stopping job: {}", e);
                    fatal.get_or_insert(e);
                }
                SegmentRun::Skipped => skipped += 1,
            }
        }
        drop(futures);

        let cancelled = fatal.is_none() && skipped > 0 && cancel.load(Ordering::Relaxed);
        if let Some(ref e) = fatal {
            self.registry.fail(job_id, e.to_string()).await?;
        } else if cancelled {
            info!(job_id = %job_id, skipped, "Job cancelled");
            self.registry.fail(job_id, "cancelled").await?;
        }

        let job = self.registry.get(job_id).await?;
        let outcome = match (job.status, job.transcript) {
            (JobStatus::Completed, Some(transcript)) => {
                self.progress
                    .on_progress(Stage::Merging, 95.0, "Merged segment transcripts");
                JobOutcome::Completed { transcript }
            }
            _ if cancelled => JobOutcome::Cancelled,
            _ => JobOutcome::Failed {
                message: job
                    .error_message
                    .unwrap_or_else(|| "job did not finish".to_string()),
            },
        };

        self.progress
            .on_progress(Stage::Cleanup, 97.0, "Deleting stored chunks");
        let chunks_deleted = self.cleanup(job_id).await;

        match outcome {
            JobOutcome::Completed { ref transcript } => self.progress.on_progress(
                Stage::Done,
                100.0,
                &format!(
                    "{} of {} segments transcribed",
                    transcript.success_count, transcript.total_segments
                ),
            ),
            JobOutcome::Failed { ref message } => {
                self.progress.on_progress(Stage::Failed, 100.0, message)
            }
            JobOutcome::Cancelled => self.progress.on_progress(Stage::Failed, 100.0, "cancelled"),
        }

        Ok(JobReport {
            job_id,
            original_filename: job.original_filename,
            total_duration: job.total_duration,
            segment_count: total,
            passthrough,
            chunks_deleted,
            elapsed: started.elapsed(),
            outcome,
        })
    }

    /// Encode, store and transcribe one segment.
    ///
    /// Encode and transcription failures come back as a failed outcome.
    /// Only storage failures are returned as `Err`.
    async fn run_segment(
        &self,
        job_id: JobId,
        source: &Path,
        range: &SegmentRange,
        passthrough: bool,
        percent: f64,
    ) -> Result<SegmentOutcome> {
        let index = range.index;

        self.progress.on_progress(
            Stage::Encoding,
            percent,
            &format!("Encoding segment {}", index),
        );
        let bytes = if passthrough {
            match tokio::fs::read(source).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(SegmentOutcome::failure(
                        range,
                        format!("cannot read {}: {}", source.display(), e),
                    ))
                }
            }
        } else {
            let label = format!("encode segment {index}");
            match self
                .settings
                .encode_retry
                .run(&label, |_| self.encoder.encode(source, range))
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => return Ok(SegmentOutcome::failure(range, e.to_string())),
            }
        };

        let size = bytes.len();
        if size as u64 > self.settings.budget.max_bytes {
            warn!(
                job_id = %job_id,
                index,
                size,
                "Segment exceeds the {} byte budget",
                self.settings.budget.max_bytes
            );
        }
        let limit = self.transcriber.max_payload_bytes();
        if size > limit {
            let e = ScribeError::PayloadTooLarge { size, limit };
            return Ok(SegmentOutcome::failure(range, e.to_string()));
        }

        self.progress.on_progress(
            Stage::Uploading,
            percent,
            &format!("Storing segment {}", index),
        );
        let chunk = self.store_chunk(job_id, index, bytes).await?;
        let label = format!("fetch segment {index}");
        let audio = self
            .settings
            .store_retry
            .run(&label, |_| self.store.get(&chunk))
            .await?;

        self.progress.on_progress(
            Stage::Transcribing,
            percent,
            &format!("Transcribing segment {}", index),
        );
        let file_name = if passthrough {
            source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| chunk_file_name(&chunk))
        } else {
            chunk_file_name(&chunk)
        };

        let label = format!("transcribe segment {index}");
        let result = self
            .settings
            .transcribe_retry
            .run(&label, |_| {
                self.transcriber
                    .transcribe(&audio, &file_name, &self.settings.options)
            })
            .await;

        Ok(match result {
            Ok(transcript) => SegmentOutcome::success(range, transcript.text)
                .with_phrases(transcript.phrases)
                .with_language(transcript.language),
            Err(e) => SegmentOutcome::failure(range, e.to_string()),
        })
    }

    async fn store_chunk(&self, job_id: JobId, index: usize, bytes: Vec<u8>) -> Result<ChunkRef> {
        let size_bytes = bytes.len();
        let label = format!("store segment {index}");
        let stored = self
            .settings
            .store_retry
            .run(&label, |_| self.store.put(job_id, index, bytes.clone()))
            .await;

        match stored {
            Ok(chunk) => Ok(chunk),
            // a concurrent or earlier attempt already stored this segment
            Err(ScribeError::ChunkExists { .. }) => {
                debug!(job_id = %job_id, index, "Reusing stored chunk");
                Ok(ChunkRef {
                    job_id,
                    index,
                    key: chunk_key(job_id, index),
                    size_bytes,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn chunk_file_name(chunk: &ChunkRef) -> String {
    chunk
        .key
        .rsplit('/')
        .next()
        .unwrap_or(chunk.key.as_str())
        .to_string()
}

/// Planning takes the first 5%, segment work the next 85%.
fn overall_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 5.0;
    }
    5.0 + 85.0 * completed as f64 / total as f64
}
