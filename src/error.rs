//! Error types for the recognition pipeline

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the OCR worker, its client, and the progress store.
///
/// A required tag that was not found is *not* an error: the engine ran and
/// produced a result, and the verifier turns that into a failed attempt.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("recognition cancelled")]
    Cancelled,

    #[error("OCR worker disconnected")]
    WorkerDisconnected,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OcrError {
    /// Whether this error means the engine itself could not produce a result.
    ///
    /// These failures always unlock manual override in the verifier.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            OcrError::EngineUnavailable(_) | OcrError::Timeout(_) | OcrError::WorkerDisconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
