pub mod encode;
pub mod plan;
pub mod probe;

pub use encode::{check_ffmpeg, FfmpegEncoder, SegmentEncoder};
pub use plan::{plan_segments, SegmentBudget, SegmentPlan, DEFAULT_MAX_SEGMENT_BYTES, MAX_SEGMENTS};
pub use probe::{check_ffprobe, parse_ffprobe_output, probe_wav, FfprobeProbe, MediaProbe};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the probe learned about a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Duration,
    pub size_bytes: u64,
    pub has_audio: bool,
    pub has_video: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// A half-open `[start, end)` slice of the source media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRange {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
}

impl SegmentRange {
    /// Get the duration of this segment.
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}
