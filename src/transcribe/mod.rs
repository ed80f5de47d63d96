pub mod whisper;

pub use whisper::{WhisperClient, WhisperModel};

use crate::config::Config;
use crate::error::{Result, ScribeError};
use crate::merge::TimedPhrase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Hard per-request ceiling of the transcription vendor (25 MB).
pub const VENDOR_MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// ISO 639-1 source language; `None` lets the vendor detect it.
    pub language: Option<String>,
    /// Vocabulary or style hint.
    pub prompt: Option<String>,
}

/// What the vendor recognized in one segment. Phrase times are relative to
/// the start of the submitted audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub phrases: Vec<TimedPhrase>,
    pub language: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        options: &TranscribeOptions,
    ) -> Result<Transcript>;

    fn name(&self) -> &'static str;

    fn max_payload_bytes(&self) -> usize {
        VENDOR_MAX_PAYLOAD_BYTES
    }
}

/// Build the transcriber selected in the configuration.
pub fn create_transcriber(config: &Config) -> Result<Box<dyn Transcriber>> {
    let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
        ScribeError::Config(
            "OpenAI API key not set. Set OPENAI_API_KEY environment variable.".to_string(),
        )
    })?;

    let mut client = WhisperClient::new(api_key.clone()).with_model(config.model);
    if let Some(ref base_url) = config.openai_base_url {
        client = client.with_base_url(base_url.clone());
    }
    Ok(Box::new(client))
}
