//! Message types for communication between the OCR client and its worker

use tokio_util::sync::CancellationToken;

use crate::vision::{ImageSource, RecognitionResult};

/// Messages sent from the client to the worker
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    /// Build the engine ahead of the first recognition
    Initialize { id: String },
    /// Recognize an image and score it against the required tags
    Recognize {
        id: String,
        image: ImageSource,
        required_tags: Vec<String>,
        /// Cancelled when the caller gave up on this request
        cancel: CancellationToken,
    },
    /// Release the engine and stop the worker
    Terminate { id: String },
}

impl WorkerRequest {
    /// Correlation id of this request
    pub fn id(&self) -> &str {
        match self {
            WorkerRequest::Initialize { id }
            | WorkerRequest::Recognize { id, .. }
            | WorkerRequest::Terminate { id } => id,
        }
    }
}

/// Messages sent from the worker to the client
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    /// Engine is loaded and ready
    InitializeAck { id: String },
    /// Recognition progress (fraction in 0.0 - 1.0)
    Progress { id: String, status: String, fraction: f32 },
    /// Final recognition result
    Result { id: String, result: RecognitionResult },
    /// The engine failed to load or run
    Error { id: String, message: String },
    /// The request was cancelled before a result was delivered
    Cancelled { id: String },
    /// Worker released its engine and is exiting
    TerminateAck { id: String },
}

impl WorkerResponse {
    /// Correlation id of the request this answers
    pub fn id(&self) -> &str {
        match self {
            WorkerResponse::InitializeAck { id }
            | WorkerResponse::Progress { id, .. }
            | WorkerResponse::Result { id, .. }
            | WorkerResponse::Error { id, .. }
            | WorkerResponse::Cancelled { id }
            | WorkerResponse::TerminateAck { id } => id,
        }
    }

    /// Whether this is the last message for its request
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerResponse::Progress { .. })
    }
}
