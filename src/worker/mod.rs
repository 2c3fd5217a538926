//! OCR Worker
//!
//! Runs the OCR engine on a dedicated thread so long recognitions never block
//! the caller. The worker owns exactly one engine, built lazily by the
//! injected factory, and answers every request with messages carrying the
//! request's correlation id.

pub mod messages;

pub use messages::{WorkerRequest, WorkerResponse};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OcrError, Result};
use crate::vision::{analyze, EngineFactory, ImageSource, MatchOptions, OcrEngine};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No engine loaded yet (or the last one became unusable)
    Idle,
    /// Engine is being built
    Initializing,
    /// Engine loaded, waiting for work
    Ready,
    /// Recognition in progress
    Recognizing,
    /// Worker has stopped; a new one is needed
    Terminated,
}

/// Client side of a running worker thread
pub struct WorkerHandle {
    requests: Sender<WorkerRequest>,
    responses: Receiver<WorkerResponse>,
    state: Arc<RwLock<WorkerState>>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker thread
    pub fn spawn(factory: EngineFactory, match_options: MatchOptions) -> Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let state = Arc::new(RwLock::new(WorkerState::Idle));

        let worker = OcrWorker {
            factory,
            match_options,
            engine: None,
            state: state.clone(),
            responses: response_tx,
        };

        let thread = std::thread::Builder::new()
            .name("ocr-worker".to_string())
            .spawn(move || worker.run(request_rx))?;

        info!("OCR worker started");

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            state,
            thread,
        })
    }

    /// Queue a request; fails if the worker has exited
    pub fn send(&self, request: WorkerRequest) -> std::result::Result<(), WorkerRequest> {
        self.requests.send(request).map_err(|e| e.into_inner())
    }

    /// Receiver for worker responses
    pub fn responses(&self) -> Receiver<WorkerResponse> {
        self.responses.clone()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) {
        drop(self.requests);
        if self.thread.join().is_err() {
            warn!("OCR worker thread panicked");
        }
    }
}

/// Worker-side state, owned by the worker thread
struct OcrWorker {
    factory: EngineFactory,
    match_options: MatchOptions,
    engine: Option<Box<dyn OcrEngine>>,
    state: Arc<RwLock<WorkerState>>,
    responses: Sender<WorkerResponse>,
}

impl OcrWorker {
    fn run(mut self, requests: Receiver<WorkerRequest>) {
        while let Ok(request) = requests.recv() {
            match request {
                WorkerRequest::Initialize { id } => self.initialize(id),
                WorkerRequest::Recognize {
                    id,
                    image,
                    required_tags,
                    cancel,
                } => self.recognize(id, &image, &required_tags, &cancel),
                WorkerRequest::Terminate { id } => {
                    self.engine = None;
                    self.set_state(WorkerState::Terminated);
                    self.send(WorkerResponse::TerminateAck { id });
                    info!("OCR worker terminated");
                    return;
                }
            }
        }

        // Client dropped its sender
        self.engine = None;
        self.set_state(WorkerState::Terminated);
        debug!("OCR worker exiting, client disconnected");
    }

    /// Best-effort warm-up; failures are only visible as a missing ack
    fn initialize(&mut self, id: String) {
        match self.ensure_engine() {
            Ok(()) => self.send(WorkerResponse::InitializeAck { id }),
            Err(e) => warn!("OCR engine warm-up failed: {}", e),
        }
    }

    fn recognize(&mut self, id: String, image: &ImageSource, required_tags: &[String], cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            debug!("Request {} cancelled before start", id);
            self.send(WorkerResponse::Cancelled { id });
            return;
        }

        if let Err(e) = self.ensure_engine() {
            self.send(WorkerResponse::Error {
                id,
                message: error_message(&e),
            });
            return;
        }

        self.set_state(WorkerState::Recognizing);
        let start = Instant::now();
        debug!("Request {}: recognizing {} ({} bytes)", id, image.label(), image.len());

        let outcome = {
            let Some(engine) = self.engine.as_mut() else {
                return;
            };
            let responses = &self.responses;
            let mut on_progress = |status: &str, fraction: f32| {
                if cancel.is_cancelled() {
                    return;
                }
                let _ = responses.send(WorkerResponse::Progress {
                    id: id.clone(),
                    status: status.to_string(),
                    fraction: fraction.clamp(0.0, 1.0),
                });
            };
            let outcome = engine.recognize(image, cancel, &mut on_progress);
            (outcome, engine.is_usable())
        };

        match outcome {
            (Ok(output), _) => {
                self.set_state(WorkerState::Ready);
                if cancel.is_cancelled() {
                    debug!("Request {} cancelled, discarding result", id);
                    self.send(WorkerResponse::Cancelled { id });
                    return;
                }
                let result = analyze(&output, required_tags, &self.match_options);
                info!(
                    "Request {} done in {:?}: detected={} overall={}",
                    id,
                    start.elapsed(),
                    result.detected,
                    result.overall_confidence
                );
                self.send(WorkerResponse::Result { id, result });
            }
            (Err(e), usable) if cancel.is_cancelled() => {
                debug!("Request {} cancelled during recognition: {}", id, e);
                if !usable {
                    self.engine = None;
                }
                self.set_state(if usable { WorkerState::Ready } else { WorkerState::Idle });
                self.send(WorkerResponse::Cancelled { id });
            }
            (Err(e), usable) => {
                warn!("Request {} failed: {}", id, e);
                if usable {
                    self.set_state(WorkerState::Ready);
                } else {
                    warn!("OCR engine unusable, it will be rebuilt on the next request");
                    self.engine = None;
                    self.set_state(WorkerState::Idle);
                }
                self.send(WorkerResponse::Error {
                    id,
                    message: error_message(&e),
                });
            }
        }
    }

    fn ensure_engine(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        self.set_state(WorkerState::Initializing);
        match (self.factory)() {
            Ok(engine) => {
                info!("OCR engine '{}' loaded", engine.name());
                self.engine = Some(engine);
                self.set_state(WorkerState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Idle);
                Err(e)
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    fn send(&self, response: WorkerResponse) {
        if self.responses.send(response).is_err() {
            debug!("Dropping worker response, client gone");
        }
    }
}

/// Error text sent across the worker boundary
fn error_message(e: &OcrError) -> String {
    match e {
        OcrError::EngineUnavailable(message) => message.clone(),
        other => other.to_string(),
    }
}
