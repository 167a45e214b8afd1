//! Error types used across the library.

use thiserror::Error;

/// The error type returned by pretty much everything in the library.
///
/// During a handshake, errors always come back through the one-shot returned
/// by [`VoiceLink::connect`](crate::link::VoiceLink::connect) -- nothing is
/// thrown at you from a background task. Once a link is established, node
/// trouble shows up as a [`voice_close`](crate::playback::Playback::voice_close)
/// notification instead, because the connect one-shot has already been
/// consumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A required connect argument was missing or empty. Rejected before any
    /// state change.
    #[error("missing required argument: {0}")]
    InvalidArgument(&'static str),

    /// At most one handshake may be in flight per link; a second `connect`
    /// fails with this without touching the first attempt.
    #[error("a handshake is already in progress for this link")]
    AlreadyConnecting,

    /// No node acknowledgment within the connect deadline. The link is back
    /// at `Disconnected` and may be connected again.
    #[error("voice connection not established within the deadline")]
    HandshakeTimeout,

    /// The node refused the merged voice update while the handshake was still
    /// pending.
    #[error("node rejected the voice update: {0}")]
    NodeRejected(String),

    /// The node reported a failure after the link was already established.
    /// Non-fatal: the link stays connected and the caller owns recovery.
    #[error("node reported a voice error after connect: {0}")]
    VoiceClosed(String),

    /// An in-flight handshake was abandoned by an explicit teardown.
    #[error("connect attempt cancelled by disconnect")]
    Cancelled,

    /// Transport-level failure in a gateway or node adapter.
    #[error("adapter send failed: {0}")]
    Adapter(String),
}
