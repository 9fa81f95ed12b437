//! # Error Types
//!
//! Error handling for the tunnel core.
//!
//! The taxonomy follows the two recovery boundaries of the system:
//!
//! - **Frame errors** are per-message parse failures. They are handled at the
//!   decode call site (dropped, at most logged) and never terminate a session;
//!   the peer's retransmission timer recovers whatever the broken message was
//!   carrying.
//! - **Transport errors** are transient failures of a single send or receive
//!   against the message transport. They are retried with bounded exponential
//!   backoff before escalating.
//! - **Session errors** are fatal. They terminate the [`TunnelSession`] that
//!   raised them, close both byte-stream ends, and are surfaced to the caller
//!   with a named reason. The tunnel either delivers a byte-exact, in-order
//!   stream or dies cleanly with one of these.
//!
//! [`TunnelSession`]: crate::session::TunnelSession

use thiserror::Error;

/// Failure to interpret one incoming transport message as a frame.
///
/// None of these are surfaced past the decode loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The message matches the tunnel header signature but its fields are
    /// inconsistent or the payload encoding is invalid.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// The payload decoded but its CRC32 disagrees with the header checksum.
    /// Transport-level corruption or truncation.
    #[error("frame checksum mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the decoded payload.
        actual: u32,
    },

    /// The message does not match the tunnel header signature at all.
    /// Somebody else is talking in our channel; silently ignored.
    #[error("not a tunnel frame")]
    Foreign,
}

/// Transient failure of a single message-transport operation.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The transport rejected or failed the send; retryable.
    #[error("message send failed: {0}")]
    SendFailed(String),

    /// The transport is gone for good (receive stream ended).
    #[error("message transport closed")]
    Closed,
}

/// Fatal session failure. Terminates the session, not the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The oldest unacknowledged frame exhausted its retransmission budget.
    #[error("peer unresponsive: frame {sequence} unacknowledged after {retries} retries")]
    PeerUnresponsive {
        /// Sequence number of the frame that gave up.
        sequence: u32,
        /// Retransmissions attempted before giving up.
        retries: u32,
    },

    /// The reassembly buffer exceeded its bound while waiting for a missing
    /// predecessor frame.
    #[error("reorder window overflow: {buffered} frames held, limit {limit}")]
    ReorderOverflow {
        /// Out-of-order frames currently buffered.
        buffered: usize,
        /// Configured reorder window bound.
        limit: usize,
    },

    /// The message transport failed past its retry budget, or its receive
    /// stream ended while the session was still active.
    #[error("message transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The 32-bit sequence space for one direction ran out. Sessions do not
    /// renegotiate; this is a hard cap on per-session volume.
    #[error("outbound sequence space exhausted")]
    SequenceExhausted,

    /// The configuration could not be loaded or failed validation. Raised
    /// before any session state exists.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Type alias for Results carrying a fatal session error.
pub type Result<T> = std::result::Result<T, SessionError>;
