//! Verification Layer
//!
//! Applies the pass/fail policy to recognition results and drives the
//! retry/manual-override flow for one proof-of-share submission.

pub mod policy;
pub mod verifier;

pub use policy::{TagPolicy, VerificationPolicy};
pub use verifier::{
    Action, Failure, FailureKind, VerificationObserver, Verifier, VerifierOptions, VerifyState,
};
