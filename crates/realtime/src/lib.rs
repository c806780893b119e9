//! Solace Realtime Session Core
//!
//! Holds one duplex voice session per care subject against a remote
//! conversational model service: credential negotiation, transport and
//! handshake, push-to-talk capture, buffered playback with barge-in,
//! correlated tool-call dispatch, and caregiver instruction injection.
//! Device access and every external service sit behind traits so the whole
//! core runs deterministically under test.

pub mod audio;
pub mod error;
pub mod events;
pub mod negotiate;
pub mod relay;
pub mod session;
pub mod tools;
pub mod turn;

pub use error::{
    CaptureError, NegotiationError, PlaybackError, SessionError, ToolExecutionError,
};
pub use session::{
    SessionEvent, SessionHandle, SessionOptions, SessionRuntime, start_session,
};
pub use turn::TurnState;
