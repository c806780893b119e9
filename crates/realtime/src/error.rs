//! Error taxonomy for the realtime session core.
//!
//! Session-fatal failures (negotiation, handshake, transport) terminate the
//! session and require an explicit restart. Per-unit failures (one capture
//! attempt, one playback, one tool call) are contained, reported through the
//! event stream, and leave the session open.

use std::time::Duration;
use thiserror::Error;

/// Failures that abort `start_session` or terminate a live session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("configuration handshake was not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("transport failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("session is closed")]
    Closed,
}

/// Credential negotiation failures. Always fatal, never retried, and no
/// transport connection is attempted after one of these.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("negotiation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("negotiation service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("negotiation response carries no ephemeral credential")]
    MissingCredential,
}

/// Capture-device failures. Local to one segment; the session stays open.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Device(String),
    #[error("a capture segment is already in progress")]
    Busy,
}

/// Render-device failures. Local to one playback; the session stays open.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("render device unavailable: {0}")]
    Device(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tool executor rejected or failed a call. The dispatcher folds these into
/// synthetic error results so the conversation never stalls on a bad tool.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ToolExecutionError {
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
