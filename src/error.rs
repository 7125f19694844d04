//! Failure taxonomy shared by the capture client, the detection service and
//! the alert pipeline.
//!
//! Only source and model unavailability at startup are fatal. Everything else
//! is scoped to a single tick or a single request and is logged by the owner.

use thiserror::Error;

/// Errors raised while serving one `/detect` request.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("No image data received")]
    EmptyBody,
    #[error("Invalid image: {0}")]
    Decode(String),
    #[error("Model not loaded: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to encode annotated image: {0}")]
    Encode(String),
}

impl DetectError {
    /// Narrowest HTTP status for the failure kind.
    pub fn status_code(&self) -> u16 {
        match self {
            DetectError::EmptyBody | DetectError::Decode(_) => 400,
            DetectError::ModelUnavailable(_)
            | DetectError::Inference(_)
            | DetectError::Encode(_) => 500,
        }
    }
}

/// Why a detection round-trip failed on the client side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, DNS failure, timeout, broken body stream.
    Network,
    /// The service answered with anything other than 200.
    ServerError { status: u16 },
    /// The response body was not a decodable image.
    Decode,
}

impl TransportErrorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TransportErrorKind::Network => "network",
            TransportErrorKind::ServerError { .. } => "server_error",
            TransportErrorKind::Decode => "decode_error",
        }
    }
}

#[derive(Debug, Error)]
#[error("{tag}: {message}", tag = .kind.tag())]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::ServerError { status },
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            message: message.into(),
        }
    }
}

/// Failures local to the alert pipeline. Never surfaced to the requester.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("evidence encode failed: {0}")]
    Encode(String),
    #[error("image upload failed: {0}")]
    Upload(String),
    #[error("alert store append failed: {0}")]
    Store(String),
    #[error("alert record rejected: {0}")]
    InvalidRecord(&'static str),
}

/// Fatal capture-loop failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),
}
