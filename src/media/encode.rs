use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ScribeError};

use super::SegmentRange;

/// Produces transcription-ready audio for one time range of a source file.
#[async_trait]
pub trait SegmentEncoder: Send + Sync {
    /// Encode `range` of `source` as mono 16 kHz MP3.
    async fn encode(&self, source: &Path, range: &SegmentRange) -> Result<Vec<u8>>;

    fn name(&self) -> &'static str;
}

/// Check if FFmpeg is installed and accessible.
pub async fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            ScribeError::Encode(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(ScribeError::Encode("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

fn round_millis(d: Duration) -> u128 {
    (d.as_nanos() + 500_000) / 1_000_000
}

fn format_millis(ms: u128) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Encoder that shells out to `ffmpeg` and captures the MP3 stream on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    bitrate: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            bitrate: "64k".to_string(),
        }
    }
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MP3 bitrate (e.g. "48k"). 64k mono keeps ten minutes near 4.8 MB.
    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    fn build_args(&self, source: &Path, range: &SegmentRange) -> Vec<String> {
        // Round both edges once so adjacent ranges share the same boundary.
        let start_ms = round_millis(range.start);
        let end_ms = round_millis(range.end);
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format_millis(start_ms),
            "-t".to_string(),
            format_millis(end_ms.saturating_sub(start_ms)),
            "-i".to_string(),
            source.display().to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
            "-f".to_string(),
            "mp3".to_string(),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl SegmentEncoder for FfmpegEncoder {
    async fn encode(&self, source: &Path, range: &SegmentRange) -> Result<Vec<u8>> {
        if !source.exists() {
            return Err(ScribeError::FileNotFound(source.display().to_string()));
        }
        if range.duration().is_zero() {
            return Err(ScribeError::Encode(format!(
                "segment {} has zero duration",
                range.index
            )));
        }

        debug!(
            "Encoding segment {}: start={:.3}s duration={:.3}s",
            range.index,
            range.start.as_secs_f64(),
            range.duration().as_secs_f64()
        );

        let output = Command::new("ffmpeg")
            .args(self.build_args(source, range))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScribeError::Encode(format!("Failed to run FFmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScribeError::Encode(format!(
                "FFmpeg exited with {} on segment {}: {}",
                output.status,
                range.index,
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(ScribeError::Encode(format!(
                "FFmpeg produced no audio for segment {}",
                range.index
            )));
        }

        Ok(output.stdout)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn range(start: u64, end: u64) -> SegmentRange {
        SegmentRange {
            index: 3,
            start: Duration::from_secs(start),
            end: Duration::from_secs(end),
        }
    }

    #[test]
    fn test_build_args_time_range() {
        let encoder = FfmpegEncoder::new().with_bitrate("48k");
        let args = encoder.build_args(Path::new("/media/talk.mp4"), &range(600, 1200));

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "600.000");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "600.000");
        assert!(args.contains(&"/media/talk.mp4".to_string()));
        assert!(args.contains(&"48k".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_adjacent_ranges_share_rounded_boundary() {
        let encoder = FfmpegEncoder::new();
        let boundary = Duration::from_nanos(333_333_333_500);
        let first = SegmentRange {
            index: 0,
            start: Duration::from_nanos(1_400_000),
            end: boundary,
        };
        let second = SegmentRange {
            index: 1,
            start: boundary,
            end: Duration::from_nanos(666_666_667_000),
        };

        let arg = |args: &[String], flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        let a = encoder.build_args(Path::new("in.mp4"), &first);
        let b = encoder.build_args(Path::new("in.mp4"), &second);

        assert_eq!(arg(&a, "-ss"), "0.001");
        assert_eq!(arg(&a, "-t"), "333.332");
        assert_eq!(arg(&b, "-ss"), "333.333");
        assert_eq!(arg(&b, "-t"), "333.334");
        assert_eq!(round_millis(first.end), round_millis(second.start));
    }

    #[tokio::test]
    async fn test_encode_missing_source() {
        let result = FfmpegEncoder::new()
            .encode(Path::new("/nonexistent/source.mp4"), &range(0, 10))
            .await;
        assert!(matches!(result, Err(ScribeError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_encode_wav_segment() {
        if !ffmpeg_available() {
            eprintln!("Skipping test: FFmpeg not available");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..48000 {
            let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let result = FfmpegEncoder::new().encode(&path, &range(1, 2)).await;
        if let Err(ScribeError::Encode(msg)) = &result {
            // some builds ship without libmp3lame
            if msg.contains("libmp3lame") || msg.contains("Unknown encoder") {
                eprintln!("Skipping test: {msg}");
                return;
            }
        }
        let bytes = result.unwrap();
        assert!(!bytes.is_empty());
    }
}
