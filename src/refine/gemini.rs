//! Transcript refinement through the Gemini generateContent API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScribeError};

use super::{language_code_to_name, RefineTask, Refiner};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiRefiner {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiRefiner {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gemini-2.0-flash".to_string(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_prompt(&self, text: &str, task: &RefineTask) -> String {
        match task {
            RefineTask::Reformat => format!(
                r#"The following is a raw speech transcript. Add punctuation, fix capitalization and split it into paragraphs.
Do not add, remove or reword anything. Return ONLY the formatted transcript.

Transcript:
{text}"#
            ),
            RefineTask::Translate(lang) => {
                let lang_name = language_code_to_name(lang);
                format!(
                    r#"Translate the following transcript to {lang_name}.
Return ONLY the translated text, nothing else. Preserve paragraph breaks.

Transcript:
{text}"#
                )
            }
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl Refiner for GeminiRefiner {
    async fn refine(&self, text: &str, task: &RefineTask) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        debug!("Refining {} chars ({}) with {}", text.len(), task, self.model);

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: self.build_prompt(text, task),
                }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<GeminiResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ScribeError::InvalidCredentials(message)
                }
                StatusCode::TOO_MANY_REQUESTS => ScribeError::RateLimited {
                    message,
                    retry_after: None,
                },
                _ => ScribeError::Api {
                    status: status.as_u16(),
                    message: format!("Gemini API error: {message}"),
                },
            });
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body)?;
        if let Some(error) = gemini_response.error {
            return Err(ScribeError::Api {
                status: status.as_u16(),
                message: format!("Gemini error: {}", error.message),
            });
        }

        let refined = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .map(|parts| {
                parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if refined.trim().is_empty() {
            return Err(ScribeError::Transcription(
                "Gemini returned an empty refinement".to_string(),
            ));
        }
        Ok(refined.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
