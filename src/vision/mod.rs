//! Vision/OCR Layer
//!
//! Recognizes text in submitted screenshots and checks it for the tags a
//! challenge requires:
//! - Tag normalization and extraction
//! - Engine abstraction with a Tesseract backend
//! - Tag confidence analysis over engine output

pub mod analysis;
pub mod engine;
pub mod preprocess;
pub mod tags;
pub mod tesseract;

pub use analysis::{analyze, MatchOptions, RecognitionResult};
pub use engine::{EngineFactory, EngineOutput, ImageSource, OcrEngine, RecognizedWord};
pub use tags::{extract_tags, fuzzy_normalize, strict_normalize};
pub use tesseract::TesseractEngine;
