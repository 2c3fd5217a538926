//! Recognition session
//!
//! Stateful wrapper around [`OcrClient`] for front ends: tracks whether a
//! recognition is running, its whole-percent progress, and the latest result.
//! The session is the one owner allowed to tear the worker down, which it
//! does when dropped.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::OcrClient;
use crate::error::Result;
use crate::vision::{ImageSource, RecognitionResult};

/// Observable session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// A recognition is in flight
    pub is_analyzing: bool,
    /// Progress in whole percent, never decreasing within one run
    pub progress: u8,
    /// Result of the latest finished run
    pub result: Option<RecognitionResult>,
}

/// Stateful recognition front end
pub struct OcrSession {
    client: Arc<OcrClient>,
    state: Arc<RwLock<SessionState>>,
    /// Bumped by every `run`; only the latest run may write state
    generation: AtomicU64,
}

impl OcrSession {
    pub fn new(client: Arc<OcrClient>) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(SessionState::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Shared handle for observing progress from another thread
    pub fn shared_state(&self) -> Arc<RwLock<SessionState>> {
        self.state.clone()
    }

    pub fn client(&self) -> &Arc<OcrClient> {
        &self.client
    }

    /// Recognize `image` against `required_tags`, tracking progress.
    ///
    /// A newer `run` supersedes this one: the older call still returns its
    /// outcome, but no longer touches the session state.
    pub fn run(&self, image: &ImageSource, required_tags: &[String]) -> Result<RecognitionResult> {
        // Generation checks happen under the write lock so a superseded run
        // can never interleave with a newer run's reset.
        let generation = {
            let mut state = self.state.write();
            state.is_analyzing = true;
            state.progress = 0;
            state.result = None;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let outcome = self.client.run(image.clone(), required_tags, |status, fraction| {
            let mut state = self.state.write();
            if self.generation.load(Ordering::SeqCst) == generation && state.advance(fraction) {
                debug!("{}: {}%", status, state.progress);
            }
        });

        let mut state = self.state.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            if let Ok(result) = &outcome {
                state.result = Some(result.clone());
            }
            state.is_analyzing = false;
        } else {
            debug!("Discarding outcome of superseded run {}", generation);
        }

        outcome
    }
}

impl SessionState {
    /// Raise progress to `fraction` (clamped to 0.0 - 1.0) in whole percent.
    ///
    /// Updates can arrive out of order, so lower values are ignored.
    /// Returns whether progress moved.
    fn advance(&mut self, fraction: f32) -> bool {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }
}

impl Drop for OcrSession {
    fn drop(&mut self) {
        if let Err(e) = self.client.terminate() {
            warn!("Failed to terminate OCR worker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::error::OcrError;
    use crate::vision::engine::testing::{failing_factory, image, scripted_factory, words, Scripted};
    use std::thread;
    use std::time::Duration;

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_run_updates_state() {
        let client = Arc::new(OcrClient::new(
            scripted_factory(vec![Scripted::Words(words(&[("@DevFest", 88.0)]))]),
            ClientOptions::default(),
        ));
        let session = OcrSession::new(client);
        assert_eq!(session.state(), SessionState::default());

        let result = session.run(&image(), &tags(&["@devfest"])).unwrap();
        let state = session.state();
        assert!(!state.is_analyzing);
        assert_eq!(state.progress, 100);
        assert_eq!(state.result, Some(result));
    }

    #[test]
    fn test_failure_clears_analyzing() {
        let client = Arc::new(OcrClient::new(failing_factory("no engine"), ClientOptions::default()));
        let session = OcrSession::new(client);

        let err = session.run(&image(), &tags(&["@devfest"])).unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
        let state = session.state();
        assert!(!state.is_analyzing);
        assert!(state.result.is_none());
    }

    #[test]
    fn test_progress_observable_while_running() {
        let client = Arc::new(OcrClient::new(
            scripted_factory(vec![Scripted::Slow(Duration::from_millis(200), words(&[("#gdg", 75.0)]))]),
            ClientOptions::default(),
        ));
        let session = Arc::new(OcrSession::new(client));
        let shared = session.shared_state();

        let runner = {
            let session = session.clone();
            thread::spawn(move || session.run(&image(), &tags(&["#gdg"])).unwrap())
        };

        thread::sleep(Duration::from_millis(100));
        {
            let state = shared.read();
            assert!(state.is_analyzing);
            assert_eq!(state.progress, 50);
            assert!(state.result.is_none());
        }

        runner.join().unwrap();
        assert_eq!(shared.read().progress, 100);
        assert!(!shared.read().is_analyzing);
    }

    #[test]
    fn test_advance_keeps_running_maximum() {
        let mut state = SessionState::default();
        let seen: Vec<u8> = [0.6, 0.3, -0.5, 0.61, 1.7, 0.9]
            .into_iter()
            .map(|f| {
                state.advance(f);
                state.progress
            })
            .collect();
        assert_eq!(seen, vec![60, 60, 60, 61, 100, 100]);
        assert!(!state.advance(0.2));
    }

    #[test]
    fn test_out_of_order_progress_never_decreases() {
        let client = Arc::new(OcrClient::new(
            scripted_factory(vec![Scripted::Steps(
                vec![0.6, 0.3, -0.2, 0.8, 0.5, 1.4],
                words(&[("#gdg", 75.0)]),
            )]),
            ClientOptions::default(),
        ));
        let session = Arc::new(OcrSession::new(client));
        let shared = session.shared_state();

        let runner = {
            let session = session.clone();
            thread::spawn(move || session.run(&image(), &tags(&["#gdg"])).unwrap())
        };

        let mut samples = Vec::new();
        while !runner.is_finished() {
            samples.push(shared.read().progress);
            thread::sleep(Duration::from_millis(2));
        }
        runner.join().unwrap();
        samples.push(shared.read().progress);

        assert!(samples.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", samples);
        assert!(samples.iter().all(|p| *p <= 100));
        assert_eq!(shared.read().progress, 100);
    }

    #[test]
    fn test_drop_terminates_worker() {
        let client = Arc::new(OcrClient::new(
            scripted_factory(vec![Scripted::Words(words(&[("#gdg", 75.0)]))]),
            ClientOptions::default(),
        ));
        let session = OcrSession::new(client.clone());
        session.run(&image(), &tags(&["#gdg"])).unwrap();
        assert!(client.is_running());

        drop(session);
        assert!(!client.is_running());
    }

    #[test]
    fn test_drop_without_worker_is_quiet() {
        let client = Arc::new(OcrClient::new(scripted_factory(vec![]), ClientOptions::default()));
        drop(OcrSession::new(client.clone()));
        assert!(!client.is_running());
    }
}
