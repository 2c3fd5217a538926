//! Tag detection over engine output
//!
//! Turns raw words and text into a [`RecognitionResult`]: which tags appear in
//! the text at all, and how confidently each required tag was read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strsim::normalized_levenshtein;
use tracing::debug;

use super::engine::{EngineOutput, RecognizedWord};
use super::tags::{clean_required_tags, extract_tags, fuzzy_normalize, strict_normalize};

/// Outcome of recognizing one image against a set of required tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Every `#tag`/`@mention` token in the raw text, deduplicated in first-seen order
    pub detected_tags: Vec<String>,
    /// At least one required tag was matched
    pub detected: bool,
    /// Rounded mean confidence over all recognized words (0 - 100)
    pub overall_confidence: u8,
    /// Full recognized text
    pub raw_text: String,
    /// Confidence per required tag, `None` when the tag was not found
    pub per_tag_confidence: BTreeMap<String, Option<u8>>,
}

/// Word matching options
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Minimum normalized Levenshtein similarity for the fuzzy fallback.
    /// `None` disables the fallback.
    pub fuzzy_similarity: Option<f64>,
}

/// Build the recognition result for `required_tags` from engine output
pub fn analyze<S: AsRef<str>>(output: &EngineOutput, required_tags: &[S], options: &MatchOptions) -> RecognitionResult {
    let detected_tags = extract_tags(&output.text);

    let mut per_tag_confidence = BTreeMap::new();
    for tag in clean_required_tags(required_tags) {
        let confidence = tag_confidence(&tag, &output.words, options);
        debug!("Tag {} -> {:?}", tag, confidence);
        per_tag_confidence.insert(tag, confidence);
    }

    let detected = per_tag_confidence.values().any(Option::is_some);
    let overall_confidence = mean_confidence(output.words.iter());

    RecognitionResult {
        detected_tags,
        detected,
        overall_confidence,
        raw_text: output.text.clone(),
        per_tag_confidence,
    }
}

/// Average confidence of the words matching `tag`, or `None` if nothing matched
pub fn tag_confidence(tag: &str, words: &[RecognizedWord], options: &MatchOptions) -> Option<u8> {
    let needle = strict_normalize(tag);
    let strict: Vec<&RecognizedWord> = words
        .iter()
        .filter(|w| strict_normalize(&w.text).contains(&needle))
        .collect();

    if !strict.is_empty() {
        return Some(mean_confidence(strict.into_iter()));
    }

    let min_similarity = options.fuzzy_similarity?;
    let fuzzy_needle = fuzzy_normalize(tag);
    if fuzzy_needle.is_empty() {
        return None;
    }

    let fuzzy: Vec<&RecognizedWord> = words
        .iter()
        .filter(|w| {
            let candidate = fuzzy_normalize(&w.text);
            !candidate.is_empty() && normalized_levenshtein(&candidate, &fuzzy_needle) >= min_similarity
        })
        .collect();

    if fuzzy.is_empty() {
        None
    } else {
        Some(mean_confidence(fuzzy.into_iter()))
    }
}

/// Rounded mean of word confidences, clamped to 0 - 100; 0 for no words
fn mean_confidence<'a>(words: impl Iterator<Item = &'a RecognizedWord>) -> u8 {
    let (sum, count) = words.fold((0.0f64, 0usize), |(sum, count), w| {
        (sum + f64::from(w.confidence.clamp(0.0, 100.0)), count + 1)
    });
    if count == 0 {
        return 0;
    }
    (sum / count as f64).round().clamp(0.0, 100.0) as u8
}
