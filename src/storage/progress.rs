//! Quest progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::ProgressStore;
use crate::error::Result;

const ATTEMPTS_PREFIX: &str = "attempts.";
const COMPLETED_KEY: &str = "completed";

/// A verified challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeCompletion {
    /// Challenge identifier
    pub challenge: String,
    /// Verified by manual override rather than recognition
    pub forced: bool,
    /// Best per-tag confidence at verification time
    pub confidence: Option<u8>,
    /// Tags seen in the submitted image
    pub tags: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl ProgressStore {
    /// Failed verification attempts for `challenge`
    pub fn failed_attempts(&self, challenge: &str) -> Result<u32> {
        Ok(self.get(&attempts_key(challenge))?.unwrap_or(0))
    }

    /// Count one more failed attempt, returning the new total
    pub fn record_failed_attempt(&mut self, challenge: &str) -> Result<u32> {
        let attempts = self.failed_attempts(challenge)? + 1;
        self.set(&attempts_key(challenge), &attempts)?;
        Ok(attempts)
    }

    pub fn reset_attempts(&mut self, challenge: &str) -> Result<bool> {
        self.remove(&attempts_key(challenge))
    }

    /// All `(challenge, failed attempts)` counters
    pub fn attempt_counters(&self) -> Result<Vec<(String, u32)>> {
        let challenges: Vec<String> = self
            .keys_with_prefix(ATTEMPTS_PREFIX)
            .map(|k| k[ATTEMPTS_PREFIX.len()..].to_string())
            .collect();
        challenges
            .into_iter()
            .map(|c| -> Result<(String, u32)> {
                let count = self.failed_attempts(&c)?;
                Ok((c, count))
            })
            .collect()
    }

    /// Record a verified challenge and clear its attempt counter
    pub fn record_completion(&mut self, completion: &ChallengeCompletion) -> Result<()> {
        self.append(COMPLETED_KEY, completion)?;
        self.reset_attempts(&completion.challenge)?;
        Ok(())
    }

    pub fn completions(&self) -> Result<Vec<ChallengeCompletion>> {
        Ok(self.get(COMPLETED_KEY)?.unwrap_or_default())
    }

    pub fn is_completed(&self, challenge: &str) -> Result<bool> {
        Ok(self.completions()?.iter().any(|c| c.challenge == challenge))
    }
}

fn attempts_key(challenge: &str) -> String {
    format!("{}{}", ATTEMPTS_PREFIX, challenge)
}
