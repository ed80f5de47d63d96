//! Optional AI post-processing of a merged transcript.

pub mod gemini;

pub use gemini::GeminiRefiner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ScribeError};

/// Character budget of one refinement request.
pub const DEFAULT_BATCH_CHARS: usize = 12_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "task", content = "target")]
pub enum RefineTask {
    /// Restore punctuation and split into paragraphs without changing words.
    Reformat,
    /// Translate into the given ISO 639-1 language.
    Translate(String),
}

impl std::fmt::Display for RefineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefineTask::Reformat => write!(f, "reformat"),
            RefineTask::Translate(lang) => write!(f, "translate to {lang}"),
        }
    }
}

#[async_trait]
pub trait Refiner: Send + Sync {
    /// Refine one batch of text.
    async fn refine(&self, text: &str, task: &RefineTask) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Refine a whole transcript batch by batch, keeping batch order.
pub async fn refine_transcript(
    refiner: &dyn Refiner,
    text: &str,
    task: &RefineTask,
    max_batch_chars: usize,
) -> Result<String> {
    let batches = split_batches(text, max_batch_chars);
    debug!(
        "Refining {} batch(es) with {} ({})",
        batches.len(),
        refiner.name(),
        task
    );

    let mut refined = Vec::with_capacity(batches.len());
    for batch in &batches {
        refined.push(refiner.refine(batch, task).await?.trim().to_string());
    }
    Ok(refined.join("\n\n"))
}

/// Pack paragraphs into batches of at most `max_chars` characters.
///
/// Paragraphs longer than the budget are split at sentence ends. A single
/// sentence longer than the budget becomes its own batch.
pub fn split_batches(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<&str> = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= max_chars {
            pieces.push(paragraph);
        } else {
            pieces.extend(split_sentences(paragraph));
        }
    }

    let mut batches = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let separator = if current.is_empty() { 0 } else { 2 };
        if !current.is_empty()
            && current.chars().count() + separator + piece.chars().count() > max_chars
        {
            batches.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?' | '。')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            let sentence = paragraph[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Build the refiner selected in the configuration.
pub fn create_refiner(config: &Config) -> Result<Box<dyn Refiner>> {
    let api_key = config.gemini_api_key.as_ref().ok_or_else(|| {
        ScribeError::Config(
            "Gemini API key not set. Set GEMINI_API_KEY environment variable.".to_string(),
        )
    })?;
    Ok(Box::new(GeminiRefiner::new(api_key.clone())))
}

/// Human-readable language name for prompting.
pub fn language_code_to_name(code: &str) -> &'static str {
    match code.to_lowercase().as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "sv" => "Swedish",
        "id" => "Indonesian",
        "vi" => "Vietnamese",
        "th" => "Thai",
        _ => "the target language",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct UppercaseRefiner {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Refiner for UppercaseRefiner {
        async fn refine(&self, text: &str, _task: &RefineTask) -> Result<String> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(format!(" {} ", text.to_uppercase()))
        }

        fn name(&self) -> &'static str {
            "uppercase"
        }
    }

    #[test]
    fn test_short_text_is_one_batch() {
        let batches = split_batches("First paragraph.\n\nSecond one.", 100);
        assert_eq!(batches, vec!["First paragraph.\n\nSecond one."]);
    }

    #[test]
    fn test_paragraphs_are_packed_under_budget() {
        let text = "aaaa aaaa.\n\nbbbb bbbb.\n\ncccc cccc.";
        let batches = split_batches(text, 22);
        assert_eq!(batches, vec!["aaaa aaaa.\n\nbbbb bbbb.", "cccc cccc."]);
        assert!(batches.iter().all(|b| b.chars().count() <= 22));
    }

    #[test]
    fn test_long_paragraph_splits_at_sentences() {
        let text = "One sentence here. Another one follows! Is this the third? Yes.";
        let batches = split_batches(text, 40);
        assert_eq!(
            batches,
            vec![
                "One sentence here.\n\nAnother one follows!",
                "Is this the third?\n\nYes.",
            ]
        );
    }

    #[test]
    fn test_blank_text_has_no_batches() {
        assert!(split_batches("  \n\n  ", 100).is_empty());
    }

    #[test]
    fn test_decimal_point_is_not_a_sentence_end() {
        assert_eq!(split_sentences("It costs 3.50 today. Fine."), vec!["It costs 3.50 today.", "Fine."]);
    }

    #[tokio::test]
    async fn test_refine_transcript_keeps_batch_order() {
        let refiner = UppercaseRefiner {
            seen: Mutex::new(Vec::new()),
        };
        let out = refine_transcript(&refiner, "one.\n\ntwo.\n\nthree.", &RefineTask::Reformat, 6)
            .await
            .unwrap();
        assert_eq!(out, "ONE.\n\nTWO.\n\nTHREE.");
        assert_eq!(refiner.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_create_refiner_requires_key() {
        let mut config = Config::default();
        assert!(create_refiner(&config).is_err());
        config.gemini_api_key = Some("test-key".to_string());
        assert_eq!(create_refiner(&config).unwrap().name(), "gemini");
    }

    #[test]
    fn test_language_code_to_name() {
        assert_eq!(language_code_to_name("ES"), "Spanish");
        assert_eq!(language_code_to_name("xyz"), "the target language");
    }
}
