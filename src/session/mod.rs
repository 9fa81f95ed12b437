//! # Session Layer
//!
//! Reliability, pacing, and lifecycle for one tunneled connection.
//!
//! This module turns the raw frame stream into a dependable session: it
//! tracks sequence numbers, bounds in-flight frames, paces outgoing
//! messages, and drives both directions to a clean close.
//!
//! ## Components
//! - **Tracker**: sliding-window ordering, cumulative ACKs, retransmission
//! - **Flow**: token-bucket rate limiting for the message transport
//! - **Tunnel**: the three-task session loop tying everything together
//!
//! ## Invariants
//! - At most `window_size` unacknowledged frames in flight per direction
//! - Bytes are delivered to the local stream exactly once, in order
//! - No session task outlives [`TunnelSession::run`]

pub mod flow;
pub mod tracker;
pub mod tunnel;

// Re-export public types for advanced users
pub use flow::FlowController;
pub use tracker::{Inbound, PendingFrame, SequenceTracker};
pub use tunnel::{DirectionState, TunnelSession};
