//! # Message Tunnel
//!
//! A reliable, ordered, byte-exact bidirectional tunnel that carries a
//! local byte stream over a message-oriented text transport — one that
//! reorders, duplicates, rate-limits, and size-limits what it carries.
//!
//! ## Architecture
//! - [`core`]: frame model and text wire codec (sequence, flag, checksum,
//!   base64 payload)
//! - [`session`]: sliding-window reliability, token-bucket pacing, and the
//!   three-task session loop
//! - [`transport`]: the two capability boundaries (local byte duplex,
//!   remote message channel) plus in-process implementations
//! - [`config`]: TOML-backed configuration with validation
//! - [`utils`]: logging setup
//!
//! ## Guarantees
//! - Bytes exit the far side exactly once, in order, bit-identical
//! - In-flight frames are bounded; peer congestion pauses the local reader
//! - Outgoing messages never exceed the transport's rate or size limits
//! - Unrelated chatter sharing the channel is ignored, never misparsed
//!
//! ## Example
//! ```no_run
//! use message_tunnel::config::TunnelConfig;
//! use message_tunnel::session::TunnelSession;
//! use message_tunnel::transport::memory::{channel_pair, duplex_pair};
//!
//! # async fn run() -> message_tunnel::Result<()> {
//! let (local, _peer_bytes) = duplex_pair();
//! let (channel, _peer_channel) = channel_pair();
//!
//! let session = TunnelSession::new(TunnelConfig::default())?;
//! session.run(local, channel).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod transport;
pub mod utils;

// Re-export the types most callers need at the crate root.
pub use config::TunnelConfig;
pub use error::{FrameError, Result, SessionError, TransportError};
pub use session::TunnelSession;
