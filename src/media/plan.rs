use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScribeError};

use super::SegmentRange;

/// Byte budget per segment: the vendor's 25 MB ceiling minus a safety margin.
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 24 * 1024 * 1024;

/// Default time budget per segment.
pub const DEFAULT_MAX_SEGMENT_DURATION: Duration = Duration::from_secs(10 * 60);

/// Upper bound on segments per job; about 69 days of media at the default budget.
pub const MAX_SEGMENTS: u32 = 10_000;

/// Limits a single segment must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBudget {
    pub max_duration: Duration,
    pub max_bytes: u64,
}

impl Default for SegmentBudget {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_SEGMENT_DURATION,
            max_bytes: DEFAULT_MAX_SEGMENT_BYTES,
        }
    }
}

impl SegmentBudget {
    pub fn new(max_minutes: u64, max_bytes: u64) -> Self {
        Self {
            max_duration: Duration::from_secs(max_minutes.saturating_mul(60)),
            max_bytes,
        }
    }
}

/// Ordered, contiguous segments covering the whole source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub segments: Vec<SegmentRange>,
    pub total_duration: Duration,
}

impl SegmentPlan {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// A single segment spanning the whole file needs no re-encoding.
    pub fn is_passthrough(&self) -> bool {
        self.segments.len() == 1
    }
}

/// Split `duration` into equal segments so that neither the time budget nor
/// the byte budget is exceeded on average.
///
/// The last segment always ends exactly at `duration`.
pub fn plan_segments(
    duration: Duration,
    size_bytes: u64,
    budget: &SegmentBudget,
) -> Result<SegmentPlan> {
    if duration.is_zero() {
        return Err(ScribeError::Planning("media duration is zero".to_string()));
    }
    if budget.max_duration.is_zero() || budget.max_bytes == 0 {
        return Err(ScribeError::Planning(format!(
            "segment budget must be non-zero: {budget:?}"
        )));
    }

    let by_duration = duration.as_nanos().div_ceil(budget.max_duration.as_nanos());
    let by_size = u128::from(size_bytes).div_ceil(u128::from(budget.max_bytes));
    let count = by_duration.max(by_size).max(1);

    if count > MAX_SEGMENTS as u128 {
        return Err(ScribeError::Planning(format!(
            "{count} segments exceeds the limit of {MAX_SEGMENTS}"
        )));
    }
    let count = count as u32;

    let nominal = duration / count;
    let segments = (0..count)
        .map(|i| {
            let start = nominal * i;
            let end = if i + 1 == count {
                duration
            } else {
                nominal * (i + 1)
            };
            SegmentRange {
                index: i as usize,
                start,
                end,
            }
        })
        .collect();

    Ok(SegmentPlan {
        segments,
        total_duration: duration,
    })
}
