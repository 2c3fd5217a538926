//! OCR client
//!
//! Hides the worker behind a single blocking call. The client owns at most one
//! worker at a time, creating it on first use and replacing it after it exits.
//! A router thread forwards each worker response to the caller waiting on its
//! correlation id; responses for ids nobody waits on are dropped.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OcrError, Result};
use crate::vision::{EngineFactory, ImageSource, MatchOptions, RecognitionResult};
use crate::worker::{WorkerHandle, WorkerRequest, WorkerResponse, WorkerState};

/// How long `terminate` waits for the worker to acknowledge
const TERMINATE_WAIT: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<String, Sender<WorkerResponse>>>>;

/// Client options
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Give up on a recognition after this long; `None` waits forever
    pub timeout: Option<Duration>,
    /// Tag matching options forwarded to the worker
    pub match_options: MatchOptions,
}

/// A live worker plus the routing table for its responses
struct Connection {
    worker: WorkerHandle,
    pending: PendingMap,
    initialized: AtomicBool,
}

impl Connection {
    fn open(factory: EngineFactory, match_options: MatchOptions) -> Result<Arc<Self>> {
        let worker = WorkerHandle::spawn(factory, match_options)?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let responses = worker.responses();
        let routes = pending.clone();
        std::thread::Builder::new()
            .name("ocr-router".to_string())
            .spawn(move || route_responses(responses, routes))?;

        Ok(Arc::new(Self {
            worker,
            pending,
            initialized: AtomicBool::new(false),
        }))
    }

    /// Register a waiter for `id`; it is removed when the guard drops
    fn register(&self, id: &str) -> (Receiver<WorkerResponse>, PendingGuard) {
        let (tx, rx) = unbounded();
        self.pending.lock().insert(id.to_string(), tx);
        let guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.to_string(),
        };
        (rx, guard)
    }

    fn send(&self, request: WorkerRequest) -> Result<()> {
        self.worker.send(request).map_err(|_| OcrError::WorkerDisconnected)
    }
}

/// Removes a pending route so late responses are discarded
struct PendingGuard {
    pending: PendingMap,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

fn route_responses(responses: Receiver<WorkerResponse>, pending: PendingMap) {
    while let Ok(response) = responses.recv() {
        let route = pending.lock().get(response.id()).cloned();
        match route {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Ignoring worker response for unknown request {}", response.id()),
        }
    }
    // Worker gone: wake every waiter with a disconnect
    pending.lock().clear();
    debug!("OCR router exiting");
}

/// Single-call facade over the OCR worker
pub struct OcrClient {
    factory: EngineFactory,
    options: ClientOptions,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl OcrClient {
    pub fn new(factory: EngineFactory, options: ClientOptions) -> Self {
        Self {
            factory,
            options,
            connection: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether a worker is currently running
    pub fn is_running(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|c| c.worker.is_alive())
    }

    /// State of the current worker, if any
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.connection.lock().as_ref().map(|c| c.worker.state())
    }

    /// Get the running worker, spawning one if needed.
    ///
    /// Spawn failures are returned to the caller and retried on the next call.
    fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock();
        if let Some(conn) = slot.as_ref() {
            if conn.worker.is_alive() {
                return Ok(conn.clone());
            }
            debug!("OCR worker exited, starting a new one");
        }
        let conn = Connection::open(self.factory.clone(), self.options.match_options)?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Detach `conn` so the next call starts a fresh worker.
    ///
    /// The worker may be stuck inside the engine; it is asked to stop and
    /// exits once the engine returns, without holding up later requests.
    fn retire(&self, conn: &Arc<Connection>) {
        {
            let mut slot = self.connection.lock();
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, conn)) {
                *slot = None;
            }
        }
        let id = Uuid::new_v4().to_string();
        if conn.send(WorkerRequest::Terminate { id }).is_err() {
            debug!("Retired OCR worker already exited");
        } else {
            info!("Retired unresponsive OCR worker");
        }
    }

    /// Warm up the engine, waiting up to `wait` for the acknowledgement.
    ///
    /// Returns whether the worker acknowledged; failures are never fatal.
    pub fn initialize(&self, wait: Duration) -> bool {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("OCR warm-up skipped: {}", e);
                return false;
            }
        };

        let id = Uuid::new_v4().to_string();
        let (rx, _guard) = conn.register(&id);
        if conn.send(WorkerRequest::Initialize { id }).is_err() {
            return false;
        }

        match rx.recv_timeout(wait) {
            Ok(WorkerResponse::InitializeAck { .. }) => {
                conn.initialized.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Recognize `image` and score it against `required_tags`
    pub fn run<F>(&self, image: ImageSource, required_tags: &[String], on_progress: F) -> Result<RecognitionResult>
    where
        F: FnMut(&str, f32),
    {
        self.run_with_cancel(image, required_tags, on_progress, CancellationToken::new())
    }

    /// Like [`run`](Self::run), abandoning the work when `cancel` fires.
    ///
    /// A timeout cancels the token too, so the worker drops the request.
    pub fn run_with_cancel<F>(
        &self,
        image: ImageSource,
        required_tags: &[String],
        mut on_progress: F,
        cancel: CancellationToken,
    ) -> Result<RecognitionResult>
    where
        F: FnMut(&str, f32),
    {
        let conn = self.connection()?;
        let id = Uuid::new_v4().to_string();
        let (rx, _guard) = conn.register(&id);

        if !conn.initialized.load(Ordering::SeqCst) {
            conn.send(WorkerRequest::Initialize { id: id.clone() })?;
        }
        conn.send(WorkerRequest::Recognize {
            id: id.clone(),
            image,
            required_tags: required_tags.to_vec(),
            cancel: cancel.clone(),
        })?;
        debug!("Sent recognition request {}", id);

        let deadline = self.options.timeout.map(|t| (t, Instant::now() + t));

        loop {
            let response = match deadline {
                Some((timeout, at)) => match rx.recv_deadline(at) {
                    Ok(response) => response,
                    Err(RecvTimeoutError::Timeout) => {
                        warn!("Recognition request {} timed out after {:?}", id, timeout);
                        cancel.cancel();
                        self.retire(&conn);
                        return Err(OcrError::Timeout(timeout));
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(OcrError::WorkerDisconnected),
                },
                None => rx.recv().map_err(|_| OcrError::WorkerDisconnected)?,
            };

            debug_assert_eq!(response.id(), id);
            match response {
                WorkerResponse::InitializeAck { .. } => {
                    conn.initialized.store(true, Ordering::SeqCst);
                }
                WorkerResponse::Progress { status, fraction, .. } => on_progress(&status, fraction),
                WorkerResponse::Result { result, .. } => return Ok(result),
                WorkerResponse::Error { message, .. } => return Err(OcrError::EngineUnavailable(message)),
                WorkerResponse::Cancelled { .. } => return Err(OcrError::Cancelled),
                WorkerResponse::TerminateAck { .. } => return Err(OcrError::WorkerDisconnected),
            }
        }
    }

    /// Stop the worker and release its engine.
    ///
    /// The next `run` starts a fresh worker.
    pub fn terminate(&self) -> Result<()> {
        let Some(conn) = self.connection.lock().take() else {
            return Ok(());
        };

        let id = Uuid::new_v4().to_string();
        let (rx, _guard) = conn.register(&id);
        conn.send(WorkerRequest::Terminate { id })?;

        match rx.recv_timeout(TERMINATE_WAIT) {
            Ok(WorkerResponse::TerminateAck { .. }) => {
                info!("OCR worker terminated");
                Ok(())
            }
            // Router cleared the table: the worker already exited
            Ok(_) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(OcrError::Timeout(TERMINATE_WAIT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::engine::testing::{failing_factory, image, scripted_factory, words, Scripted};
    use std::thread;

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_run_returns_result_and_progress() {
        let client = OcrClient::new(
            scripted_factory(vec![Scripted::Words(words(&[("@DevFest", 88.0)]))]),
            ClientOptions::default(),
        );
        let mut seen = Vec::new();
        let result = client
            .run(image(), &tags(&["@devfest"]), |status, fraction| {
                seen.push((status.to_string(), fraction))
            })
            .unwrap();

        assert_eq!(result.per_tag_confidence["@devfest"], Some(88));
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().1, 1.0);
        assert!(client.is_running());
    }

    #[test]
    fn test_worker_is_reused() {
        let client = OcrClient::new(
            scripted_factory(vec![Scripted::Words(words(&[("#gdg", 60.0)]))]),
            ClientOptions::default(),
        );
        client.run(image(), &tags(&["#gdg"]), |_, _| {}).unwrap();
        let first = client.connection().unwrap();
        client.run(image(), &tags(&["#gdg"]), |_, _| {}).unwrap();
        let second = client.connection().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_engine_failure_is_error() {
        let client = OcrClient::new(failing_factory("tesseract missing"), ClientOptions::default());
        let err = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap_err();
        assert!(err.is_engine_failure());
        assert!(err.to_string().contains("tesseract missing"));

        // Not cached: the next call tries to build the engine again
        let err = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
    }

    #[test]
    fn test_timeout_cancels_request() {
        let client = OcrClient::new(
            scripted_factory(vec![
                Scripted::Interruptible(Duration::from_secs(30), words(&[("@devfest", 90.0)])),
                Scripted::Words(words(&[("@devfest", 91.0)])),
            ]),
            ClientOptions {
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );
        let err = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)));
        assert!(err.is_engine_failure());

        let result = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap();
        assert_eq!(result.per_tag_confidence["@devfest"], Some(91));
    }

    #[test]
    fn test_retry_after_timeout_skips_stuck_worker() {
        // The first engine ignores cancellation and stays busy well past the retry
        let client = OcrClient::new(
            scripted_factory(vec![
                Scripted::Slow(Duration::from_millis(1500), words(&[("@devfest", 90.0)])),
                Scripted::Words(words(&[("@devfest", 93.0)])),
            ]),
            ClientOptions {
                timeout: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        let err = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)));
        assert!(!client.is_running());

        let started = Instant::now();
        let result = client.run(image(), &tags(&["@devfest"]), |_, _| {}).unwrap();
        assert_eq!(result.per_tag_confidence["@devfest"], Some(93));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_explicit_cancel() {
        let client = OcrClient::new(
            scripted_factory(vec![Scripted::Slow(Duration::from_millis(200), words(&[("@a", 90.0)]))]),
            ClientOptions::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });
        let err = client
            .run_with_cancel(image(), &tags(&["@a"]), |_, _| {}, cancel)
            .unwrap_err();
        assert!(matches!(err, OcrError::Cancelled));
    }

    #[test]
    fn test_overlapping_calls_get_their_own_results() {
        let client = Arc::new(OcrClient::new(
            scripted_factory(vec![
                Scripted::Words(words(&[("@first", 81.0)])),
                Scripted::Words(words(&[("@second", 82.0)])),
            ]),
            ClientOptions::default(),
        ));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let client = client.clone();
                thread::spawn(move || client.run(image(), &tags(&["@first", "@second"]), |_, _| {}).unwrap())
            })
            .collect();

        let mut confidences: Vec<u8> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .map(|r| r.per_tag_confidence.values().flatten().copied().next().unwrap())
            .collect();
        confidences.sort();
        assert_eq!(confidences, vec![81, 82]);
    }

    #[test]
    fn test_terminate_then_restart() {
        let client = OcrClient::new(
            scripted_factory(vec![Scripted::Words(words(&[("#gdg", 60.0)]))]),
            ClientOptions::default(),
        );
        assert!(client.terminate().is_ok());
        assert!(!client.is_running());

        client.run(image(), &tags(&["#gdg"]), |_, _| {}).unwrap();
        assert!(client.is_running());
        client.terminate().unwrap();
        assert!(!client.is_running());

        let result = client.run(image(), &tags(&["#gdg"]), |_, _| {}).unwrap();
        assert!(result.detected);
    }

    #[test]
    fn test_initialize_ack() {
        let client = OcrClient::new(scripted_factory(vec![]), ClientOptions::default());
        assert!(client.initialize(Duration::from_secs(5)));
        assert_eq!(client.worker_state(), Some(WorkerState::Ready));

        let failing = OcrClient::new(failing_factory("nope"), ClientOptions::default());
        assert!(!failing.initialize(Duration::from_millis(100)));
    }
}
