//! # Core Tunnel Components
//!
//! Frame model, chunking, and the text wire codec.
//!
//! ## Wire Format
//! ```text
//! [Sequence(10 digits)] | [Flag(1)] | [Checksum(8 hex)] | [Payload(base64)]
//! ```
//!
//! Everything above this layer deals in [`frame::Frame`] values; everything
//! below it deals in transport text messages.

pub mod codec;
pub mod frame;
