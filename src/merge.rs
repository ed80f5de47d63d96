//! Deterministic reassembly of per-segment results into one transcript.
//!
//! Outcomes are always ordered by segment index before any text is joined,
//! so the result does not depend on the order in which network calls finished.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::SegmentOutcome;

/// A timed phrase returned by the transcription vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedPhrase {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// One entry of the index-ordered detail list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSegment {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
    pub error: Option<String>,
    /// Phrase timings, absolute within the source media.
    pub phrases: Vec<TimedPhrase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub full_text: String,
    pub segments: Vec<MergedSegment>,
    pub total_segments: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub word_count: usize,
    pub char_count: usize,
    pub language: Option<String>,
}

impl MergedTranscript {
    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &str)> {
        self.segments
            .iter()
            .filter_map(|s| s.error.as_deref().map(|e| (s.index, e)))
    }
}

/// Merge per-segment outcomes in index order.
///
/// If the same index appears more than once, the first occurrence wins.
pub fn merge(mut outcomes: Vec<SegmentOutcome>) -> MergedTranscript {
    outcomes.sort_by_key(|o| o.index);
    outcomes.dedup_by_key(|o| o.index);

    let mut texts: Vec<&str> = Vec::with_capacity(outcomes.len());
    let mut language = None;
    let mut success_count = 0;

    for outcome in &outcomes {
        if !outcome.is_success() {
            continue;
        }
        success_count += 1;
        let trimmed = outcome.text.trim();
        if !trimmed.is_empty() {
            texts.push(trimmed);
        }
        if language.is_none() {
            language = outcome.language.clone();
        }
    }

    let full_text = texts.join(" ");
    let total_segments = outcomes.len();

    let segments = outcomes
        .into_iter()
        .map(|o| {
            let offset = o.start;
            MergedSegment {
                index: o.index,
                start: o.start,
                end: o.end,
                text: o.text.trim().to_string(),
                error: o.error,
                phrases: o
                    .phrases
                    .into_iter()
                    .map(|p| TimedPhrase {
                        start: offset + p.start,
                        end: offset + p.end,
                        text: p.text.trim().to_string(),
                    })
                    .collect(),
            }
        })
        .collect();

    MergedTranscript {
        word_count: full_text.split_whitespace().count(),
        char_count: full_text.chars().count(),
        full_text,
        segments,
        total_segments,
        success_count,
        failure_count: total_segments - success_count,
        language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SegmentRange;

    fn range(index: usize) -> SegmentRange {
        SegmentRange {
            index,
            start: Duration::from_secs(index as u64 * 600),
            end: Duration::from_secs((index as u64 + 1) * 600),
        }
    }

    #[test]
    fn test_partial_failure_scenario() {
        let outcomes = vec![
            SegmentOutcome::success(&range(0), "Hello"),
            SegmentOutcome::failure(&range(1), "vendor timeout"),
            SegmentOutcome::success(&range(2), "world"),
        ];

        let merged = merge(outcomes);
        assert_eq!(merged.full_text, "Hello world");
        assert_eq!(merged.total_segments, 3);
        assert_eq!(merged.success_count, 2);
        assert_eq!(merged.failure_count, 1);
        assert_eq!(merged.segments[1].error.as_deref(), Some("vendor timeout"));
        assert_eq!(merged.segments[1].text, "");
        assert_eq!(merged.errors().collect::<Vec<_>>(), vec![(1, "vendor timeout")]);
    }

    #[test]
    fn test_merge_ignores_arrival_order() {
        let texts = ["one", "two", "three", "four", "five"];
        let in_order: Vec<SegmentOutcome> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| SegmentOutcome::success(&range(i), *t))
            .collect();
        let expected = merge(in_order.clone());

        // a handful of fixed permutations, including full reversal
        let permutations: [[usize; 5]; 4] =
            [[4, 3, 2, 1, 0], [2, 0, 4, 1, 3], [1, 2, 3, 4, 0], [3, 4, 0, 2, 1]];
        for perm in permutations {
            let shuffled: Vec<SegmentOutcome> =
                perm.iter().map(|&i| in_order[i].clone()).collect();
            let merged = merge(shuffled);
            assert_eq!(merged.full_text, expected.full_text);
            assert_eq!(merged.segments, expected.segments);
        }
        assert_eq!(expected.full_text, "one two three four five");
        assert_eq!(expected.word_count, 5);
    }

    #[test]
    fn test_counts_come_from_full_text() {
        let outcomes = vec![
            SegmentOutcome::success(&range(0), "  padded   text \n"),
            SegmentOutcome::success(&range(1), "   "),
            SegmentOutcome::success(&range(2), "end"),
        ];

        let merged = merge(outcomes);
        assert_eq!(merged.full_text, "padded   text end");
        assert_eq!(merged.word_count, 3);
        assert_eq!(merged.char_count, merged.full_text.chars().count());
        assert_eq!(merged.success_count, 3);
    }

    #[test]
    fn test_phrases_are_shifted_to_source_time() {
        let outcome = SegmentOutcome::success(&range(1), "hi there").with_phrases(vec![
            TimedPhrase {
                start: Duration::from_millis(500),
                end: Duration::from_millis(1500),
                text: " hi there ".to_string(),
            },
        ]);

        let merged = merge(vec![outcome]);
        let phrase = &merged.segments[0].phrases[0];
        assert_eq!(phrase.start, Duration::from_millis(600_500));
        assert_eq!(phrase.end, Duration::from_millis(601_500));
        assert_eq!(phrase.text, "hi there");
    }

    #[test]
    fn test_language_from_first_successful_segment() {
        let outcomes = vec![
            SegmentOutcome::failure(&range(0), "boom").with_language(Some("de".into())),
            SegmentOutcome::success(&range(1), "hola").with_language(Some("es".into())),
            SegmentOutcome::success(&range(2), "amigo").with_language(Some("pt".into())),
        ];
        assert_eq!(merge(outcomes).language.as_deref(), Some("es"));
    }

    #[test]
    fn test_duplicate_index_counted_once() {
        let outcomes = vec![
            SegmentOutcome::success(&range(0), "first"),
            SegmentOutcome::success(&range(0), "again"),
        ];
        let merged = merge(outcomes);
        assert_eq!(merged.total_segments, 1);
        assert_eq!(merged.full_text, "first");
    }

    #[test]
    fn test_empty_input() {
        let merged = merge(Vec::new());
        assert!(merged.full_text.is_empty());
        assert_eq!(merged.total_segments, 0);
        assert_eq!(merged.success_count + merged.failure_count, 0);
    }
}
