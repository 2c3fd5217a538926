//! Pass/fail policy for a recognition result

use serde::{Deserialize, Serialize};

use crate::vision::tags::clean_required_tags;
use crate::vision::RecognitionResult;

/// How many required tags must clear the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TagPolicy {
    /// Any single required tag is enough
    #[default]
    Any,
    /// Every required tag must pass on its own
    All,
}

/// Threshold plus tag policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Minimum confidence (0 - 100), compared with `>=`
    pub threshold: u8,
    pub mode: TagPolicy,
}

impl VerificationPolicy {
    pub fn new(threshold: u8, mode: TagPolicy) -> Self {
        Self {
            threshold: threshold.min(100),
            mode,
        }
    }

    /// Decide whether `result` verifies the post.
    ///
    /// Per-tag confidences are used when present. Without them, fall back to
    /// case-insensitive membership in the detected tags plus the overall
    /// confidence.
    pub fn evaluate<S: AsRef<str>>(&self, result: &RecognitionResult, required_tags: &[S]) -> bool {
        if !result.per_tag_confidence.is_empty() {
            let passes = |c: &Option<u8>| c.is_some_and(|c| c >= self.threshold);
            let mut confidences = result.per_tag_confidence.values();
            return match self.mode {
                TagPolicy::Any => confidences.any(passes),
                TagPolicy::All => confidences.all(passes),
            };
        }

        let detected: Vec<String> = result.detected_tags.iter().map(|t| t.to_lowercase()).collect();
        let required = clean_required_tags(required_tags);
        let present = |tag: &String| detected.contains(&tag.to_lowercase());
        let membership = match self.mode {
            TagPolicy::Any => required.iter().any(present),
            TagPolicy::All => !required.is_empty() && required.iter().all(present),
        };

        membership && result.overall_confidence >= self.threshold
    }
}
