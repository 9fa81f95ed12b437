//! Frame model for the tunnel protocol.
//!
//! A [`Frame`] is one sequenced, checksummed chunk of the tunneled byte
//! stream. There is no type hierarchy; DATA, ACK and FIN are variants of a
//! single tag sharing the same fields. The CRC32 checksum is a property of
//! the wire encoding, computed and verified by [`crate::core::codec`], so an
//! in-memory frame can never carry a stale checksum.

use bytes::Bytes;

/// Frame tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries tunneled payload bytes. The sequence-0 liveness probe is an
    /// empty DATA frame; all other DATA frames have a non-empty payload.
    Data,
    /// Cumulative acknowledgement. `sequence` is the highest contiguously
    /// received sequence number; the payload is empty. ACK frames do not
    /// consume sequence numbers and are never themselves acknowledged.
    Ack,
    /// End of stream for one direction. Consumes a sequence number and is
    /// retransmitted like DATA until acknowledged. Payload may be empty.
    Fin,
}

impl FrameKind {
    /// Single-character wire tag.
    pub fn wire_char(self) -> char {
        match self {
            FrameKind::Data => 'D',
            FrameKind::Ack => 'A',
            FrameKind::Fin => 'F',
        }
    }

    /// Parse the wire tag back. Unknown characters are not a tunnel frame.
    pub fn from_wire_char(c: char) -> Option<Self> {
        match c {
            'D' => Some(FrameKind::Data),
            'A' => Some(FrameKind::Ack),
            'F' => Some(FrameKind::Fin),
            _ => None,
        }
    }
}

/// A sequenced chunk of the tunneled byte stream.
///
/// Sequence numbers are strictly increasing per direction, starting at 0.
/// They never wrap; the session terminates before exhausting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the per-direction sequence space (for ACK frames, the
    /// cumulative acknowledged sequence instead).
    pub sequence: u32,
    /// Frame tag.
    pub kind: FrameKind,
    /// Payload bytes, bounded by the codec's max payload size.
    pub payload: Bytes,
}

impl Frame {
    /// A DATA frame carrying `payload` at `sequence`.
    pub fn data(sequence: u32, payload: Bytes) -> Self {
        Self {
            sequence,
            kind: FrameKind::Data,
            payload,
        }
    }

    /// The cumulative ACK for everything up to and including `acked`.
    pub fn ack(acked: u32) -> Self {
        Self {
            sequence: acked,
            kind: FrameKind::Ack,
            payload: Bytes::new(),
        }
    }

    /// The end-of-stream marker at `sequence`.
    pub fn fin(sequence: u32) -> Self {
        Self {
            sequence,
            kind: FrameKind::Fin,
            payload: Bytes::new(),
        }
    }

    /// Whether this frame occupies the sequence space and therefore must be
    /// acknowledged by the peer (DATA and FIN; not ACK).
    pub fn is_sequenced(&self) -> bool {
        matches!(self.kind, FrameKind::Data | FrameKind::Fin)
    }

    /// Whether this frame ends its direction of the stream.
    pub fn is_fin(&self) -> bool {
        self.kind == FrameKind::Fin
    }
}
