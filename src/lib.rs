//! Quest Verifier - OCR verification of social-share screenshots
//!
//! Checks that a screenshot of a social post contains the hashtags and
//! mentions a community quest challenge asks for. Recognition runs on a
//! dedicated worker thread; a verifier applies the confidence policy and
//! offers retry or manual override when recognition falls short.

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod verify;
pub mod vision;
pub mod worker;

pub use client::{ClientOptions, OcrClient};
pub use error::{OcrError, Result};
pub use session::{OcrSession, SessionState};
pub use verify::{TagPolicy, VerificationObserver, VerificationPolicy, Verifier, VerifierOptions, VerifyState};
pub use vision::{ImageSource, RecognitionResult};
