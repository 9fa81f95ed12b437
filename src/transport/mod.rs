//! # Transport Capability Boundaries
//!
//! The two external surfaces the tunnel core depends on, as narrow traits:
//!
//! - [`ByteDuplex`]: the local bidirectional byte stream (a TCP connection
//!   in practice). Split into an owned reader and writer so the two
//!   directions can run as independent tasks.
//! - [`MessageChannel`]: the remote message-oriented transport. Split into a
//!   cloneable sender (the outbound pump, the ACK path, and the retransmit
//!   timer all send) and a single receiver.
//!
//! Implementations over real sockets or a real messaging service live with
//! the caller; [`memory`] provides in-process implementations for tests and
//! examples.
//!
//! Trait methods return `impl Future + Send` so session tasks can be
//! spawned onto a multi-threaded runtime.

pub mod memory;

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TransportRetryConfig;
use crate::error::{SessionError, TransportError};

/// Read side of the local byte stream.
pub trait ByteReader: Send + 'static {
    /// Read the next chunk of bytes. `Ok(None)` signals end-of-stream,
    /// distinct from "no data yet" which is simply a pending future.
    fn read(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// Write side of the local byte stream.
pub trait ByteWriter: Send + 'static {
    /// Write all of `buf`, suspending on local socket backpressure.
    fn write(&mut self, buf: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the write side, flushing buffered data.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// The local bidirectional byte-stream endpoint.
pub trait ByteDuplex: Send + 'static {
    /// Owned read half.
    type Reader: ByteReader;
    /// Owned write half.
    type Writer: ByteWriter;

    /// Split into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Send surface of the message transport. Cloned across session tasks.
pub trait MessageSender: Clone + Send + Sync + 'static {
    /// Post one text message. Subject to the transport's own limits; rate
    /// pacing is the caller's job.
    fn send(&self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Receive surface of the message transport: a non-restartable stream of
/// incoming text messages for the session's channel.
pub trait MessageReceiver: Send + 'static {
    /// Next incoming message. `None` means the transport shut down.
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send;
}

/// The remote message-oriented transport.
///
/// Implementations must deliver only the peer's messages to the receiver;
/// filtering out our own authorship is the adapter's job. Human chatter in
/// the same channel may still come through and is handled by the decoder.
pub trait MessageChannel: Send + 'static {
    /// Cloneable send handle.
    type Sender: MessageSender;
    /// Receive handle.
    type Receiver: MessageReceiver;

    /// Split into send and receive halves.
    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// Send one message, retrying transient failures with bounded exponential
/// backoff.
///
/// This is independent of frame-level retransmission: it covers a single
/// transport call hiccuping, not a lost frame. Exhausting the budget (or
/// cancellation mid-backoff) is fatal to the session.
pub async fn send_with_retry<S: MessageSender>(
    sender: &S,
    text: &str,
    retry: &TransportRetryConfig,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let mut backoff = retry.initial_backoff;

    for attempt in 1..=retry.max_send_retries {
        match sender.send(text.to_owned()).await {
            Ok(()) => return Ok(()),
            Err(TransportError::Closed) => {
                return Err(SessionError::TransportUnavailable(
                    "transport closed while sending".to_string(),
                ));
            }
            Err(TransportError::SendFailed(reason)) if attempt < retry.max_send_retries => {
                debug!(attempt, %reason, "transient send failure, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return Err(SessionError::TransportUnavailable(
                            "session cancelled during send retry".to_string(),
                        ));
                    }
                }
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(30));
            }
            Err(TransportError::SendFailed(reason)) => {
                warn!(%reason, attempts = retry.max_send_retries, "send retry budget exhausted");
                return Err(SessionError::TransportUnavailable(reason));
            }
        }
    }

    // max_send_retries is validated non-zero; the loop always returns.
    Err(SessionError::TransportUnavailable(
        "send retry budget exhausted".to_string(),
    ))
}
