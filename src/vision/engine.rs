//! OCR engine abstraction
//!
//! The worker only needs raw text plus word-level confidences from whatever
//! recognizer is plugged in. Engines are built by a factory so a fresh one can
//! be created whenever a worker starts or a previous engine became unusable.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// An image handed to the recognition pipeline (camera capture or file import)
#[derive(Debug, Clone)]
pub struct ImageSource {
    bytes: Arc<[u8]>,
    /// Where the image came from, for logging
    label: String,
}

impl ImageSource {
    /// Wrap in-memory image bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, label: impl Into<String>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            label: label.into(),
        }
    }

    /// Read an image file from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(bytes, path.display().to_string()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A single word reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedWord {
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0 - 100)
    pub confidence: f32,
}

impl RecognizedWord {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Raw engine output for one image
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Full recognized text
    pub text: String,
    /// Word-level results
    pub words: Vec<RecognizedWord>,
}

/// Callback receiving `(status, fraction)` progress updates from an engine
pub type ProgressFn<'a> = dyn FnMut(&str, f32) + 'a;

/// A text recognizer
pub trait OcrEngine: Send {
    /// Human readable engine name
    fn name(&self) -> &str;

    /// Recognize text in an image, reporting progress as it goes.
    ///
    /// Long-running engines should stop early with [`OcrError::Cancelled`](crate::error::OcrError::Cancelled)
    /// once `cancel` fires.
    fn recognize(
        &mut self,
        image: &ImageSource,
        cancel: &CancellationToken,
        progress: &mut ProgressFn<'_>,
    ) -> Result<EngineOutput>;

    /// Whether the engine can serve another request after a failure.
    /// The worker drops unusable engines and rebuilds them on the next request.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Builds engines on demand
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn OcrEngine>> + Send + Sync>;
