//! Verification flow for one proof-of-share image
//!
//! `Running -> Success | Failed`, `Failed -> Running` on retry, and
//! `Failed -> Success` on manual override. The caller owns the failed-attempt
//! counter and is told about every attempt and every verification through a
//! [`VerificationObserver`].

use std::time::Duration;
use tracing::{info, warn};

use super::policy::VerificationPolicy;
use crate::session::OcrSession;
use crate::vision::{ImageSource, RecognitionResult};

/// Receives verification events; owns the attempt counter
pub trait VerificationObserver {
    /// The post was verified, automatically or by manual override (`forced`)
    fn on_verified(&mut self, result: &RecognitionResult, forced: bool);

    /// An attempt failed
    fn on_attempt(&mut self);

    /// Failed attempts so far, including the one just reported
    fn failed_attempts(&self) -> u32;
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The engine ran but no required tag met the policy
    NoTagDetected,
    /// The engine could not run at all
    EngineUnavailable,
}

/// A failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Manual override is offered
    pub can_override: bool,
    /// Tags the user was asked to include
    pub required_tags: Vec<String>,
}

impl Failure {
    pub fn ocr_unavailable(&self) -> bool {
        self.kind == FailureKind::EngineUnavailable
    }

    /// User-facing explanation
    pub fn message(&self) -> String {
        match self.kind {
            FailureKind::NoTagDetected => format!(
                "We couldn't read {} clearly in your screenshot. Make sure the tags are visible and try again.",
                self.required_tags.join(" or ")
            ),
            FailureKind::EngineUnavailable => {
                "Text recognition isn't available right now. You can confirm your post manually.".to_string()
            }
        }
    }

    /// Actions offered, primary first
    pub fn actions(&self) -> Vec<Action> {
        if self.can_override {
            vec![Action::ManualOverride, Action::Retry]
        } else {
            vec![Action::Retry]
        }
    }
}

/// What the user can do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Retry,
    ManualOverride,
}

/// Verification state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyState {
    Running,
    Success { forced: bool },
    Failed(Failure),
}

/// Verification settings supplied by the challenge
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    pub required_tags: Vec<String>,
    pub policy: VerificationPolicy,
    /// Offer manual override once this many attempts have failed
    pub override_after_attempts: u32,
    /// Pause between reaching success and reporting it
    pub success_delay: Duration,
}

/// Drives verification of one image
pub struct Verifier<'a, O: VerificationObserver> {
    session: &'a OcrSession,
    image: ImageSource,
    options: VerifierOptions,
    observer: O,
    state: VerifyState,
    result: Option<RecognitionResult>,
}

impl<'a, O: VerificationObserver> Verifier<'a, O> {
    pub fn new(session: &'a OcrSession, image: ImageSource, options: VerifierOptions, observer: O) -> Self {
        Self {
            session,
            image,
            options,
            observer,
            state: VerifyState::Running,
            result: None,
        }
    }

    /// Run the first attempt
    pub fn start(&mut self) -> &VerifyState {
        self.attempt();
        &self.state
    }

    /// Run another attempt after a failure; ignored in any other state
    pub fn retry(&mut self) -> &VerifyState {
        if matches!(self.state, VerifyState::Failed(_)) {
            self.attempt();
        }
        &self.state
    }

    /// Accept the submission without a passing result.
    ///
    /// Only allowed while the current failure offers it. Returns whether the
    /// override was applied.
    pub fn manual_override(&mut self) -> bool {
        let allowed = matches!(&self.state, VerifyState::Failed(f) if f.can_override);
        if !allowed {
            return false;
        }

        let result = self.result.clone().unwrap_or_default();
        info!("Verification forced by manual override");
        self.state = VerifyState::Success { forced: true };
        self.observer.on_verified(&result, true);
        true
    }

    pub fn state(&self) -> &VerifyState {
        &self.state
    }

    /// Latest recognition result, if the engine produced one
    pub fn result(&self) -> Option<&RecognitionResult> {
        self.result.as_ref()
    }

    /// The action that should receive focus after a failure
    pub fn focus_target(&self) -> Option<Action> {
        match &self.state {
            VerifyState::Failed(failure) => failure.actions().first().copied(),
            _ => None,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    fn attempt(&mut self) {
        self.state = VerifyState::Running;

        match self.session.run(&self.image, &self.options.required_tags) {
            Ok(result) => {
                let passed = self.options.policy.evaluate(&result, &self.options.required_tags);
                info!(
                    "Verification {}: overall={} tags={:?}",
                    if passed { "passed" } else { "failed" },
                    result.overall_confidence,
                    result.per_tag_confidence
                );
                self.result = Some(result);

                if passed {
                    self.state = VerifyState::Success { forced: false };
                    if !self.options.success_delay.is_zero() {
                        std::thread::sleep(self.options.success_delay);
                    }
                    if let Some(result) = &self.result {
                        self.observer.on_verified(result, false);
                    }
                } else {
                    self.fail(FailureKind::NoTagDetected);
                }
            }
            Err(e) => {
                warn!("Recognition failed: {}", e);
                self.result = None;
                self.fail(FailureKind::EngineUnavailable);
            }
        }
    }

    fn fail(&mut self, kind: FailureKind) {
        self.observer.on_attempt();
        let can_override = kind == FailureKind::EngineUnavailable
            || self.observer.failed_attempts() >= self.options.override_after_attempts;
        self.state = VerifyState::Failed(Failure {
            kind,
            can_override,
            required_tags: self.options.required_tags.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, OcrClient};
    use crate::verify::TagPolicy;
    use crate::vision::engine::testing::{failing_factory, image, scripted_factory, words, Scripted};
    use crate::vision::EngineFactory;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        attempts: u32,
        verified: Vec<(RecognitionResult, bool)>,
    }

    impl VerificationObserver for Recorder {
        fn on_verified(&mut self, result: &RecognitionResult, forced: bool) {
            self.verified.push((result.clone(), forced));
        }

        fn on_attempt(&mut self) {
            self.attempts += 1;
        }

        fn failed_attempts(&self) -> u32 {
            self.attempts
        }
    }

    fn session(factory: EngineFactory) -> OcrSession {
        OcrSession::new(Arc::new(OcrClient::new(factory, ClientOptions::default())))
    }

    fn options(tags: &[&str], mode: TagPolicy) -> VerifierOptions {
        VerifierOptions {
            required_tags: tags.iter().map(|t| t.to_string()).collect(),
            policy: VerificationPolicy::new(70, mode),
            override_after_attempts: 2,
            success_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_tag_found_passes() {
        let session = session(scripted_factory(vec![Scripted::Words(words(&[("@DevFest", 88.0)]))]));
        let mut verifier = Verifier::new(&session, image(), options(&["@devfest"], TagPolicy::Any), Recorder::default());

        assert_eq!(verifier.start(), &VerifyState::Success { forced: false });
        let recorder = verifier.into_observer();
        assert_eq!(recorder.attempts, 0);
        assert_eq!(recorder.verified.len(), 1);
        let (result, forced) = &recorder.verified[0];
        assert!(!forced);
        assert_eq!(result.per_tag_confidence["@devfest"], Some(88));
    }

    #[test]
    fn test_tag_missing_fails_without_override() {
        let session = session(scripted_factory(vec![Scripted::Words(words(&[("randomword", 95.0)]))]));
        let mut verifier = Verifier::new(&session, image(), options(&["@devfest"], TagPolicy::Any), Recorder::default());

        match verifier.start() {
            VerifyState::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::NoTagDetected);
                assert!(!failure.ocr_unavailable());
                assert!(!failure.can_override);
                assert!(failure.message().contains("@devfest"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(verifier.result().unwrap().per_tag_confidence["@devfest"], None);
        assert_eq!(verifier.focus_target(), Some(Action::Retry));
        assert!(!verifier.manual_override());
        assert_eq!(verifier.observer().attempts, 1);
    }

    #[test]
    fn test_engine_failure_offers_override_immediately() {
        let session = session(failing_factory("engine failed to load"));
        let mut verifier = Verifier::new(&session, image(), options(&["@devfest"], TagPolicy::Any), Recorder::default());

        match verifier.start() {
            VerifyState::Failed(failure) => {
                assert!(failure.ocr_unavailable());
                assert!(failure.can_override);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(verifier.observer().attempts, 1);
        assert_eq!(verifier.focus_target(), Some(Action::ManualOverride));

        assert!(verifier.manual_override());
        assert_eq!(verifier.state(), &VerifyState::Success { forced: true });
        let recorder = verifier.into_observer();
        let (result, forced) = &recorder.verified[0];
        assert!(forced);
        assert_eq!(result, &RecognitionResult::default());
    }

    #[test]
    fn test_any_and_all_policies() {
        let reply = || Scripted::Words(words(&[("@devfest", 90.0), ("#gdg", 40.0)]));

        let any_session = session(scripted_factory(vec![reply()]));
        let mut any = Verifier::new(
            &any_session,
            image(),
            options(&["@devfest", "#gdg"], TagPolicy::Any),
            Recorder::default(),
        );
        assert_eq!(any.start(), &VerifyState::Success { forced: false });

        let all_session = session(scripted_factory(vec![reply()]));
        let mut all = Verifier::new(
            &all_session,
            image(),
            options(&["@devfest", "#gdg"], TagPolicy::All),
            Recorder::default(),
        );
        assert!(matches!(all.start(), VerifyState::Failed(_)));
    }

    #[test]
    fn test_override_unlocks_after_repeated_failures() {
        let session = session(scripted_factory(vec![Scripted::Words(words(&[("nothing", 90.0)]))]));
        let mut verifier = Verifier::new(&session, image(), options(&["@devfest"], TagPolicy::Any), Recorder::default());

        let mut offered = Vec::new();
        verifier.start();
        for attempt in 1..=3 {
            if attempt > 1 {
                verifier.retry();
            }
            match verifier.state() {
                VerifyState::Failed(failure) => offered.push(failure.can_override),
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(offered, vec![false, true, true]);
        assert_eq!(verifier.observer().attempts, 3);
        assert_eq!(verifier.focus_target(), Some(Action::ManualOverride));
    }

    #[test]
    fn test_retry_can_succeed() {
        let session = session(scripted_factory(vec![
            Scripted::Words(words(&[("blurry", 30.0)])),
            Scripted::Words(words(&[("#gdg", 80.0)])),
        ]));
        let mut verifier = Verifier::new(&session, image(), options(&["#gdg"], TagPolicy::Any), Recorder::default());

        assert!(matches!(verifier.start(), VerifyState::Failed(_)));
        assert_eq!(verifier.retry(), &VerifyState::Success { forced: false });
        // retry after success does nothing
        assert_eq!(verifier.retry(), &VerifyState::Success { forced: false });
        let recorder = verifier.into_observer();
        assert_eq!(recorder.attempts, 1);
        assert_eq!(recorder.verified.len(), 1);
    }
}
