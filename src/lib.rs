pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod refine;
pub mod retry;
pub mod store;
pub mod transcribe;

pub use config::{Config, StorageBackend};
pub use error::{Result, ScribeError};
pub use job::{Job, JobId, JobRegistry, JobStatus};
pub use merge::{merge, MergedTranscript};
pub use orchestrator::{CancelFlag, JobOutcome, JobReport, Orchestrator, OrchestratorSettings};
pub use progress::{ProgressObserver, Stage};
