use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ScribeError};

use super::MediaInfo;

/// Inspects a media file without modifying it.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

/// Check if FFprobe is installed and accessible.
pub async fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            ScribeError::UnreadableMedia(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(ScribeError::UnreadableMedia(
            "FFprobe check failed".to_string(),
        ));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Probe backed by the `ffprobe` binary, with a native fast path for WAV.
#[derive(Debug, Clone, Default)]
pub struct FfprobeProbe;

impl FfprobeProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| ScribeError::FileNotFound(path.display().to_string()))?;
        let size_bytes = metadata.len();

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            let wav_path = path.to_path_buf();
            let probed = tokio::task::spawn_blocking(move || probe_wav(&wav_path, size_bytes))
                .await
                .map_err(|e| ScribeError::UnreadableMedia(format!("WAV probe task failed: {e}")))?;
            match probed {
                Ok(info) => return Ok(info),
                Err(e) => debug!("Native WAV probe failed, falling back to FFprobe: {}", e),
            }
        }

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| ScribeError::UnreadableMedia(format!("Failed to run FFprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScribeError::UnreadableMedia(format!(
                "FFprobe failed on {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let info = parse_ffprobe_output(&output.stdout, size_bytes)?;
        debug!(
            "Probed {}: {:.2}s, {} bytes, audio={}, video={}",
            path.display(),
            info.duration.as_secs_f64(),
            info.size_bytes,
            info.has_audio,
            info.has_video
        );
        Ok(info)
    }
}

/// Read duration and format straight from a WAV header.
pub fn probe_wav(path: &Path, size_bytes: u64) -> Result<MediaInfo> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| ScribeError::UnreadableMedia(format!("Invalid WAV file: {e}")))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ScribeError::UnreadableMedia(
            "WAV header reports a zero sample rate".to_string(),
        ));
    }

    // duration() counts frames, not interleaved samples
    let frames = reader.duration();
    let duration = Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64);

    Ok(MediaInfo {
        duration,
        size_bytes,
        has_audio: true,
        has_video: false,
        sample_rate: Some(spec.sample_rate),
        channels: Some(spec.channels),
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_ffprobe_output(stdout: &[u8], size_bytes: u64) -> Result<MediaInfo> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ScribeError::UnreadableMedia(format!("Failed to parse FFprobe output: {e}")))?;

    if parsed.streams.is_empty() {
        return Err(ScribeError::UnreadableMedia(
            "container has no streams".to_string(),
        ));
    }

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    let has_video = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));

    // Prefer the container duration, fall back to the audio stream's own.
    let duration_str = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| audio.and_then(|a| a.duration.as_deref()))
        .ok_or_else(|| ScribeError::UnreadableMedia("no duration reported".to_string()))?;

    let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
        ScribeError::UnreadableMedia(format!("Failed to parse duration '{duration_str}': {e}"))
    })?;
    let duration = Duration::try_from_secs_f64(duration_secs).map_err(|e| {
        ScribeError::UnreadableMedia(format!("invalid duration {duration_secs}: {e}"))
    })?;

    Ok(MediaInfo {
        duration,
        size_bytes,
        has_audio: audio.is_some(),
        has_video,
        sample_rate: audio.and_then(|a| a.sample_rate.as_deref()?.parse().ok()),
        channels: audio.and_then(|a| a.channels),
    })
}
