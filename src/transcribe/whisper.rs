use crate::error::{Result, ScribeError};
use crate::merge::TimedPhrase;
use crate::transcribe::{TranscribeOptions, Transcriber, Transcript, VENDOR_MAX_PAYLOAD_BYTES};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI API root.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Whisper model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhisperModel {
    #[default]
    #[serde(rename = "whisper-1")]
    Whisper1,
    #[serde(rename = "gpt-4o-transcribe")]
    Gpt4oTranscribe,
    #[serde(rename = "gpt-4o-mini-transcribe")]
    Gpt4oMiniTranscribe,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Whisper1 => "whisper-1",
            WhisperModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            WhisperModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
        }
    }

    /// Only whisper-1 supports `verbose_json` with segment timestamps.
    fn supports_verbose_json(&self) -> bool {
        matches!(self, WhisperModel::Whisper1)
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "whisper-1" => Ok(WhisperModel::Whisper1),
            "gpt-4o-transcribe" => Ok(WhisperModel::Gpt4oTranscribe),
            "gpt-4o-mini-transcribe" => Ok(WhisperModel::Gpt4oMiniTranscribe),
            _ => Err(format!(
                "Unknown model: {s}. Use 'whisper-1', 'gpt-4o-transcribe' or 'gpt-4o-mini-transcribe'"
            )),
        }
    }
}

/// OpenAI speech-to-text client. Makes exactly one request per call; retries
/// are the caller's business.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: WhisperModel,
}

impl WhisperClient {
    /// Create a new Whisper client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: WhisperModel::default(),
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: WhisperModel) -> Self {
        self.model = model;
        self
    }

    /// Point at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_form(
        &self,
        audio: &[u8],
        file_name: &str,
        options: &TranscribeOptions,
    ) -> Result<Form> {
        let mime_type = match file_name.rsplit('.').next() {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("mp4") => "video/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.as_str());

        if self.model.supports_verbose_json() {
            form = form
                .text("response_format", "verbose_json")
                .text("timestamp_granularities[]", "segment");
        } else {
            form = form.text("response_format", "json");
        }

        if let Some(ref lang) = options.language {
            form = form.text("language", lang.clone());
        }

        if let Some(ref prompt) = options.prompt {
            form = form.text("prompt", prompt.clone());
        }

        Ok(form)
    }

    /// Convert Whisper API response to our Transcript format.
    fn parse_response(&self, response: WhisperResponse) -> Transcript {
        let phrases = response
            .segments
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.end >= s.start)
            .filter_map(|s| {
                Some(TimedPhrase {
                    start: Duration::try_from_secs_f64(s.start).ok()?,
                    end: Duration::try_from_secs_f64(s.end).ok()?,
                    text: s.text.trim().to_string(),
                })
            })
            .collect();

        Transcript {
            text: response.text.trim().to_string(),
            phrases,
            language: response.language,
        }
    }
}

/// Map a failed response onto the error taxonomy.
fn classify_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    payload_size: usize,
) -> ScribeError {
    let detail = serde_json::from_str::<ApiErrorResponse>(body).ok().map(|r| r.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());
    let code = detail.as_ref().and_then(|d| d.code.clone()).unwrap_or_default();
    let kind = detail.as_ref().and_then(|d| d.r#type.clone()).unwrap_or_default();

    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ScribeError::PayloadTooLarge {
            size: payload_size,
            limit: VENDOR_MAX_PAYLOAD_BYTES,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScribeError::InvalidCredentials(message),
        StatusCode::TOO_MANY_REQUESTS
            if code == "insufficient_quota" || kind == "insufficient_quota" =>
        {
            ScribeError::QuotaExceeded(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ScribeError::RateLimited {
            message,
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        },
        _ => ScribeError::Api {
            status: status.as_u16(),
            message: format!("Whisper API error: {message}"),
        },
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        options: &TranscribeOptions,
    ) -> Result<Transcript> {
        if audio.len() > VENDOR_MAX_PAYLOAD_BYTES {
            return Err(ScribeError::PayloadTooLarge {
                size: audio.len(),
                limit: VENDOR_MAX_PAYLOAD_BYTES,
            });
        }

        debug!(
            "Transcribing {} ({} bytes) with {}",
            file_name,
            audio.len(),
            self.model.as_str()
        );

        let form = self.build_form(audio, file_name, options)?;
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Whisper API response status: {}", status);

        if status.is_success() {
            let body = response.text().await?;
            let parsed: WhisperResponse = serde_json::from_str(&body)?;
            let transcript = self.parse_response(parsed);
            debug!(
                "Whisper returned {} chars in {} phrases",
                transcript.text.len(),
                transcript.phrases.len()
            );
            return Ok(transcript);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &headers, &body, audio.len()))
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_whisper_model_str() {
        assert_eq!(WhisperModel::Whisper1.as_str(), "whisper-1");
        assert_eq!(WhisperModel::Gpt4oTranscribe.as_str(), "gpt-4o-transcribe");
        assert_eq!(
            "GPT-4o-mini-transcribe".parse::<WhisperModel>().unwrap(),
            WhisperModel::Gpt4oMiniTranscribe
        );
        assert!("whisper-2".parse::<WhisperModel>().is_err());
    }

    #[test]
    fn test_parse_response_with_segments() {
        let client = WhisperClient::new("test-key".to_string());
        let response = WhisperResponse {
            text: " Hello world. How are you? ".to_string(),
            segments: Some(vec![
                WhisperSegment {
                    start: 0.0,
                    end: 2.0,
                    text: " Hello world.".to_string(),
                },
                WhisperSegment {
                    start: 2.5,
                    end: 4.0,
                    text: " How are you?".to_string(),
                },
            ]),
            language: Some("english".to_string()),
        };

        let transcript = client.parse_response(response);
        assert_eq!(transcript.text, "Hello world. How are you?");
        assert_eq!(transcript.phrases.len(), 2);
        assert_eq!(transcript.phrases[0].text, "Hello world.");
        // relative to the submitted audio, not the source media
        assert_eq!(transcript.phrases[1].start, Duration::from_millis(2500));
        assert_eq!(transcript.language.as_deref(), Some("english"));
    }

    #[test]
    fn test_parse_response_without_segments() {
        let client = WhisperClient::new("test-key".to_string());
        let response = WhisperResponse {
            text: "Hello world".to_string(),
            segments: None,
            language: None,
        };

        let transcript = client.parse_response(response);
        assert_eq!(transcript.text, "Hello world");
        assert!(transcript.phrases.is_empty());
    }

    #[test]
    fn test_classify_quota_vs_rate_limit() {
        let headers = HeaderMap::new();
        let quota = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        assert!(matches!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, &headers, quota, 1024),
            ScribeError::QuotaExceeded(_)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        let limited = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, &headers, limited, 1024);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e300"));
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, &headers, limited, 1024);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_classify_auth_and_server_errors() {
        let headers = HeaderMap::new();
        let auth = classify_error(StatusCode::UNAUTHORIZED, &headers, "{}", 1024);
        assert!(matches!(auth, ScribeError::InvalidCredentials(_)));
        assert!(!auth.is_retryable());

        let server = classify_error(StatusCode::BAD_GATEWAY, &headers, "upstream down", 1024);
        assert!(server.is_retryable());
        assert!(server.to_string().contains("upstream down"));

        let bad = classify_error(StatusCode::BAD_REQUEST, &headers, "bad file", 1024);
        assert!(!bad.is_retryable());
    }

    #[test]
    fn test_classify_payload_too_large() {
        let err = classify_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            &HeaderMap::new(),
            r#"{"error":{"message":"Maximum content size limit exceeded"}}"#,
            26_000_000,
        );
        assert!(matches!(
            err,
            ScribeError::PayloadTooLarge {
                size: 26_000_000,
                limit: VENDOR_MAX_PAYLOAD_BYTES
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_response_drops_unrepresentable_phrases() {
        let client = WhisperClient::new("test-key".to_string());
        let segment = |start: f64, end: f64| WhisperSegment {
            start,
            end,
            text: "x".to_string(),
        };
        let response = WhisperResponse {
            text: "x x x".to_string(),
            segments: Some(vec![
                segment(0.0, 1.0),
                segment(1.0, 1e300),
                segment(-2.0, -1.0),
                segment(3.0, 2.0),
            ]),
            language: None,
        };

        let transcript = client.parse_response(response);
        assert_eq!(transcript.phrases.len(), 1);
        assert_eq!(transcript.phrases[0].end, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_never_sent() {
        let client = WhisperClient::new("test-key".to_string())
            .with_base_url("http://127.0.0.1:1".to_string());
        let audio = vec![0u8; VENDOR_MAX_PAYLOAD_BYTES + 1];
        let result = client
            .transcribe(&audio, "chunk-000.mp3", &TranscribeOptions::default())
            .await;
        assert!(matches!(result, Err(ScribeError::PayloadTooLarge { .. })));
    }
}
