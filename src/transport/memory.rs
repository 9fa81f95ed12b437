//! In-process transport implementations.
//!
//! [`duplex_pair`] and [`channel_pair`] wire two endpoints together over
//! tokio channels. They exist for the integration tests and as a reference
//! for what adapters over real sockets and messaging services must provide.
//! Bounded channels give them real backpressure: a full peer suspends the
//! writer exactly like a full socket buffer would.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{ByteDuplex, ByteReader, ByteWriter, MessageChannel, MessageReceiver, MessageSender};
use crate::error::TransportError;

const DUPLEX_DEPTH: usize = 32;
const CHANNEL_DEPTH: usize = 256;

/// One end of an in-process byte duplex.
#[derive(Debug)]
pub struct MemoryDuplex {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

/// Read half of a [`MemoryDuplex`].
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::Receiver<Bytes>,
}

/// Write half of a [`MemoryDuplex`].
#[derive(Debug)]
pub struct MemoryWriter {
    // Dropped on shutdown so the peer reader sees EOF.
    tx: Option<mpsc::Sender<Bytes>>,
}

/// Two byte-duplex endpoints connected to each other.
pub fn duplex_pair() -> (MemoryDuplex, MemoryDuplex) {
    let (a_tx, b_rx) = mpsc::channel(DUPLEX_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(DUPLEX_DEPTH);
    (
        MemoryDuplex { tx: a_tx, rx: a_rx },
        MemoryDuplex { tx: b_tx, rx: b_rx },
    )
}

impl ByteDuplex for MemoryDuplex {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader { rx: self.rx },
            MemoryWriter { tx: Some(self.tx) },
        )
    }
}

impl ByteReader for MemoryReader {
    async fn read(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

impl ByteWriter for MemoryWriter {
    async fn write(&mut self, buf: Bytes) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "writer shut down"))?;
        tx.send(buf)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer reader gone"))
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// One end of an in-process message channel.
///
/// Each endpoint only ever receives the peer's messages, mirroring a real
/// adapter that filters out its own authorship.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

/// Cloneable send handle of a [`MemoryChannel`].
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::Sender<String>,
}

/// Receive handle of a [`MemoryChannel`].
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<String>,
}

/// Two message-channel endpoints connected to each other.
pub fn channel_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
    (
        MemoryChannel { tx: a_tx, rx: a_rx },
        MemoryChannel { tx: b_tx, rx: b_rx },
    )
}

impl MessageChannel for MemoryChannel {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (MemorySender { tx: self.tx }, MemoryReceiver { rx: self.rx })
    }
}

impl MessageSender for MemorySender {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).await.map_err(|_| TransportError::Closed)
    }
}

impl MessageReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_carries_bytes_and_eof() {
        let (a, b) = duplex_pair();
        let (_a_read, mut a_write) = a.split();
        let (mut b_read, _b_write) = b.split();

        a_write.write(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b_read.read().await.unwrap().unwrap(), "ping");

        a_write.shutdown().await.unwrap();
        assert!(b_read.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn channel_carries_text_both_ways() {
        let (a, b) = channel_pair();
        let (a_tx, mut a_rx) = a.split();
        let (b_tx, mut b_rx) = b.split();

        a_tx.send("from a".to_string()).await.unwrap();
        b_tx.send("from b".to_string()).await.unwrap();

        assert_eq!(b_rx.recv().await.unwrap(), "from a");
        assert_eq!(a_rx.recv().await.unwrap(), "from b");
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_is_closed() {
        let (a, b) = channel_pair();
        let (a_tx, _a_rx) = a.split();
        drop(b);

        let err = a_tx.send("anyone?".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
