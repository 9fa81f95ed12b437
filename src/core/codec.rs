//! Text codec and chunker for frames.
//!
//! The tunnel rides a transport that only carries text messages of bounded
//! length, so every frame is one fixed-delimiter text record:
//!
//! ```text
//! [Sequence(10 digits)] | [Flag(1)] | [Checksum(8 hex)] | [Payload(base64)]
//! ```
//!
//! The header is exactly [`HEADER_CHARS`] characters. Anything in the channel
//! that does not match this signature is not ours ([`FrameError::Foreign`])
//! and is dropped without comment; the channel is shared with the peer's
//! frames and with arbitrary human chatter.
//!
//! ## Sizing
//!
//! base64 expands 3 payload bytes into 4 characters, so for a transport
//! message limit of `L` characters the largest payload is
//! `(L - HEADER_CHARS) / 4 * 3` bytes. See [`max_payload_for_limit`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::core::frame::{Frame, FrameKind};
use crate::error::{FrameError, SessionError};

/// Fixed header size of the text record, delimiters included.
pub const HEADER_CHARS: usize = 22;

/// Largest payload, in bytes, that fits one transport message of
/// `transport_max_chars` characters after base64 expansion.
pub fn max_payload_for_limit(transport_max_chars: usize) -> usize {
    transport_max_chars.saturating_sub(HEADER_CHARS) / 4 * 3
}

/// Encoder/decoder between [`Frame`]s and transport-safe text records.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    /// Codec for a transport with the given message character limit.
    pub fn new(transport_max_chars: usize) -> Self {
        Self {
            max_payload: max_payload_for_limit(transport_max_chars),
        }
    }

    /// Largest payload this codec will emit or accept.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode a frame into one transport message.
    ///
    /// The checksum is computed here, over the raw payload bytes, so the
    /// wire record is always self-consistent.
    pub fn encode(&self, frame: &Frame) -> String {
        debug_assert!(
            frame.payload.len() <= self.max_payload,
            "oversized payload reached the codec"
        );

        let checksum = crc32fast::hash(&frame.payload);
        let mut out = String::with_capacity(HEADER_CHARS + frame.payload.len() / 3 * 4 + 4);
        out.push_str(&format!(
            "{:010}|{}|{:08x}|",
            frame.sequence,
            frame.kind.wire_char(),
            checksum
        ));
        BASE64.encode_string(&frame.payload, &mut out);
        out
    }

    /// Decode one transport message back into a frame.
    ///
    /// Classification:
    /// - [`FrameError::Foreign`] when the 22-character signature does not
    ///   match (wrong delimiters, non-digit sequence, unknown flag, non-hex
    ///   checksum). Callers drop these silently.
    /// - [`FrameError::Malformed`] when the signature matches but a field is
    ///   out of range or the payload is not valid base64.
    /// - [`FrameError::ChecksumMismatch`] when the payload decodes but its
    ///   CRC32 disagrees with the header.
    pub fn decode(&self, text: &str) -> Result<Frame, FrameError> {
        let bytes = text.as_bytes();
        if bytes.len() < HEADER_CHARS {
            return Err(FrameError::Foreign);
        }
        if bytes[10] != b'|' || bytes[12] != b'|' || bytes[21] != b'|' {
            return Err(FrameError::Foreign);
        }
        if !bytes[..10].iter().all(u8::is_ascii_digit) {
            return Err(FrameError::Foreign);
        }
        let kind = match FrameKind::from_wire_char(bytes[11] as char) {
            Some(kind) => kind,
            None => return Err(FrameError::Foreign),
        };
        if !bytes[13..21].iter().all(u8::is_ascii_hexdigit) {
            return Err(FrameError::Foreign);
        }

        // Signature matched: from here on, problems are malformed tunnel
        // frames, not foreign chatter.
        let sequence: u32 = text[..10]
            .parse::<u64>()
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(FrameError::Malformed("sequence out of range"))?;
        let expected = u32::from_str_radix(&text[13..21], 16)
            .map_err(|_| FrameError::Malformed("bad checksum field"))?;

        let payload = BASE64
            .decode(&bytes[HEADER_CHARS..])
            .map_err(|_| FrameError::Malformed("invalid payload encoding"))?;
        if payload.len() > self.max_payload {
            return Err(FrameError::Malformed("payload exceeds maximum size"));
        }

        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Frame {
            sequence,
            kind,
            payload: Bytes::from(payload),
        })
    }
}

/// Splits the outgoing byte stream into sequenced frames.
///
/// Owns the outbound sequence counter for its direction. Sequence numbers
/// are handed out strictly increasing from 0; the counter never wraps.
#[derive(Debug)]
pub struct Framer {
    max_payload: usize,
    // u64 so exhaustion of the u32 space is detectable instead of wrapping.
    next_sequence: u64,
}

impl Framer {
    /// Framer emitting payloads no larger than `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        assert!(max_payload > 0, "max_payload must accommodate at least one byte");
        Self {
            max_payload,
            next_sequence: 0,
        }
    }

    fn next(&mut self) -> Result<u32, SessionError> {
        let seq =
            u32::try_from(self.next_sequence).map_err(|_| SessionError::SequenceExhausted)?;
        self.next_sequence += 1;
        Ok(seq)
    }

    /// The sequence-0 liveness probe opening the direction: an empty DATA
    /// frame. Must be the first frame emitted.
    pub fn probe(&mut self) -> Result<Frame, SessionError> {
        debug_assert_eq!(self.next_sequence, 0, "probe must open the sequence space");
        Ok(Frame::data(self.next()?, Bytes::new()))
    }

    /// Split a freshly read byte slice into DATA frames of at most
    /// `max_payload` bytes each, in stream order.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, SessionError> {
        let mut frames = Vec::with_capacity(bytes.len().div_ceil(self.max_payload).max(1));
        for chunk in bytes.chunks(self.max_payload) {
            frames.push(Frame::data(self.next()?, Bytes::copy_from_slice(chunk)));
        }
        Ok(frames)
    }

    /// The end-of-stream marker, taking the next sequence number.
    pub fn fin(&mut self) -> Result<Frame, SessionError> {
        Ok(Frame::fin(self.next()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(2000)
    }

    #[test]
    fn max_payload_math() {
        // 2000-char transport limit: 1978 chars of base64, 494 groups, 1482 bytes.
        assert_eq!(max_payload_for_limit(2000), 1482);
        assert_eq!(max_payload_for_limit(HEADER_CHARS), 0);
        assert_eq!(max_payload_for_limit(HEADER_CHARS + 4), 3);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::data(42, Bytes::from_static(b"hello tunnel"));
        let text = codec().encode(&frame);
        assert!(text.len() <= 2000);
        assert_eq!(codec().decode(&text).unwrap(), frame);
    }

    #[test]
    fn encoded_record_shape() {
        let text = codec().encode(&Frame::ack(7));
        assert!(text.starts_with("0000000007|A|"));
        assert_eq!(&text[21..22], "|");
        // Empty payload: crc32 of nothing, no base64 tail.
        assert_eq!(text.len(), HEADER_CHARS);
    }

    #[test]
    fn human_chatter_is_foreign() {
        for text in [
            "",
            "hey guys what's this channel for",
            "0000000001 D deadbeef missingpipes",
            "000000000x|D|00000000|",            // non-digit sequence
            "0000000001|Z|00000000|",            // unknown flag
            "0000000001|D|0000zzzz|",            // non-hex checksum
        ] {
            assert_eq!(codec().decode(text), Err(FrameError::Foreign), "{text:?}");
        }
    }

    #[test]
    fn bad_base64_is_malformed() {
        let err = codec().decode("0000000001|D|00000000|!!!not-base64!!!");
        assert!(matches!(err, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn oversequence_is_malformed() {
        // 10 digits can express more than u32.
        let err = codec().decode("9999999999|D|00000000|");
        assert!(matches!(err, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn bit_flip_is_checksum_mismatch() {
        let frame = Frame::data(3, Bytes::from_static(b"payload under test"));
        let text = codec().encode(&frame);
        // Corrupt one character of the base64 tail.
        let mut corrupted: Vec<u8> = text.into_bytes();
        let idx = HEADER_CHARS + 2;
        corrupted[idx] = if corrupted[idx] == b'A' { b'B' } else { b'A' };
        let corrupted = String::from_utf8(corrupted).unwrap();

        assert!(matches!(
            codec().decode(&corrupted),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn framer_chunks_in_order() {
        let mut framer = Framer::new(4);
        let probe = framer.probe().unwrap();
        assert_eq!(probe.sequence, 0);
        assert!(probe.payload.is_empty());

        let frames = framer.push(b"abcdefghij").unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].sequence, 1);
        assert_eq!(&frames[0].payload[..], b"abcd");
        assert_eq!(&frames[1].payload[..], b"efgh");
        assert_eq!(&frames[2].payload[..], b"ij");

        let fin = framer.fin().unwrap();
        assert_eq!(fin.sequence, 4);
        assert!(fin.is_fin());
    }

    #[test]
    fn framer_empty_read_produces_nothing() {
        let mut framer = Framer::new(16);
        assert!(framer.push(b"").unwrap().is_empty());
    }

    #[test]
    fn every_chunk_fits_the_transport() {
        let codec = codec();
        let mut framer = Framer::new(codec.max_payload());
        let big = vec![0xA5u8; 10_000];
        for frame in framer.push(&big).unwrap() {
            assert!(codec.encode(&frame).len() <= 2000);
        }
    }
}
