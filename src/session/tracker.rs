//! Sequencing and reliable delivery.
//!
//! The message transport reorders, duplicates, and loses messages. The
//! [`SequenceTracker`] turns that into an exactly-once, in-order frame
//! stream using the classic sliding-window discipline, split the way TCP
//! splits it: a send side and a receive side with independent state.
//!
//! - Outbound: the pending window holds every transmitted-but-unacknowledged
//!   frame, bounded by the configured window size. A cumulative ACK from the
//!   peer drops everything at or below the acknowledged sequence. The oldest
//!   pending frame is retransmitted on timeout, with a bounded retry budget.
//! - Inbound: frames arriving at `expected_next` are delivered immediately
//!   together with any buffered successors they unblock. Frames from the
//!   future wait in a bounded reassembly buffer. Frames from the past are
//!   duplicates; they are dropped and the cumulative ACK is re-sent, since a
//!   duplicate usually means our previous ACK was lost.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::ReliabilityConfig;
use crate::core::frame::Frame;
use crate::error::SessionError;

/// One transmitted, not-yet-acknowledged frame.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    /// The frame itself.
    pub frame: Frame,
    /// Its wire encoding, kept so retransmission does not re-encode.
    pub encoded: String,
    /// When it was last (re)transmitted.
    pub sent_at: Instant,
    /// Retransmissions so far.
    pub retries: u32,
}

/// What the receive side did with an incoming sequenced frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// The frame was the next expected one; it and any buffered successors
    /// it unblocked are ready to hand to the local byte stream, in order.
    /// `ack` is the new cumulative acknowledgement to send.
    Delivered { frames: Vec<Frame>, ack: u32 },
    /// The frame arrived ahead of a gap and is parked in the reassembly
    /// buffer. Nothing to deliver, nothing new to acknowledge.
    Buffered,
    /// Already delivered; dropped. Re-send the cumulative ACK in case the
    /// original was lost.
    Duplicate { ack: u32 },
}

/// Ordering and reliability state for one direction pair of a session.
#[derive(Debug)]
pub struct SequenceTracker {
    // Send side.
    pending_window: BTreeMap<u32, PendingFrame>,
    window_size: usize,
    max_retries: u32,

    // Receive side.
    expected_next: u32,
    reassembly: BTreeMap<u32, Frame>,
    max_reorder_window: usize,
}

impl SequenceTracker {
    /// Tracker with the given reliability settings.
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self {
            pending_window: BTreeMap::new(),
            window_size: config.window_size,
            max_retries: config.max_retries,
            expected_next: 0,
            reassembly: BTreeMap::new(),
            max_reorder_window: config.max_reorder_window,
        }
    }

    // ---- send side ----

    /// Whether the pending window can take another frame. While this is
    /// false the local read loop must stay paused; that is the backpressure
    /// path from peer congestion to the local socket.
    pub fn has_capacity(&self) -> bool {
        self.pending_window.len() < self.window_size
    }

    /// Number of in-flight frames.
    pub fn in_flight(&self) -> usize {
        self.pending_window.len()
    }

    /// Record a frame as transmitted. Caller must have checked
    /// [`has_capacity`](Self::has_capacity) first.
    pub fn register_sent(&mut self, frame: Frame, encoded: String) {
        debug_assert!(self.pending_window.len() < self.window_size);
        trace!(sequence = frame.sequence, "frame in flight");
        self.pending_window.insert(
            frame.sequence,
            PendingFrame {
                frame,
                encoded,
                sent_at: Instant::now(),
                retries: 0,
            },
        );
    }

    /// Restart the retransmission clock for a frame once its transmission
    /// actually completed. Registration happens before the rate limiter and
    /// the transport send, so without this the ACK timeout would start
    /// ticking while the frame is still queued behind a dry token bucket.
    /// No-op if the frame was acknowledged while the send was in flight.
    pub fn mark_transmitted(&mut self, sequence: u32, now: Instant) {
        if let Some(pending) = self.pending_window.get_mut(&sequence) {
            pending.sent_at = now;
        }
    }

    /// Apply a cumulative acknowledgement: drop every pending frame with
    /// sequence at or below `upto`. Returns how many were released.
    pub fn acknowledge(&mut self, upto: u32) -> usize {
        let before = self.pending_window.len();
        self.pending_window.retain(|&seq, _| seq > upto);
        let released = before - self.pending_window.len();
        if released > 0 {
            debug!(upto, released, "cumulative ack drained window");
        }
        released
    }

    /// Whether a specific sequence number has been acknowledged (i.e. is no
    /// longer pending after having been registered).
    pub fn is_acknowledged(&self, sequence: u32) -> bool {
        !self.pending_window.contains_key(&sequence)
    }

    /// Check the oldest pending frame against the ACK timeout.
    ///
    /// If it has waited longer than `ack_timeout`, its retry counter is
    /// bumped and its encoding returned for retransmission. Exceeding the
    /// retry budget is fatal.
    pub fn due_for_retransmit(
        &mut self,
        now: Instant,
        ack_timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        let max_retries = self.max_retries;
        let Some((&sequence, pending)) = self.pending_window.iter_mut().next() else {
            return Ok(None);
        };

        if now.duration_since(pending.sent_at) < ack_timeout {
            return Ok(None);
        }

        if pending.retries >= max_retries {
            warn!(sequence, retries = pending.retries, "retry budget exhausted");
            return Err(SessionError::PeerUnresponsive {
                sequence,
                retries: pending.retries,
            });
        }

        pending.retries += 1;
        pending.sent_at = now;
        debug!(sequence, retry = pending.retries, "retransmitting oldest pending frame");
        Ok(Some(pending.encoded.clone()))
    }

    // ---- receive side ----

    /// Highest contiguously received sequence, if anything has arrived.
    pub fn cumulative_ack(&self) -> Option<u32> {
        self.expected_next.checked_sub(1)
    }

    /// Process an incoming sequenced (DATA or FIN) frame.
    pub fn accept(&mut self, frame: Frame) -> Result<Inbound, SessionError> {
        debug_assert!(frame.is_sequenced(), "ACK frames do not enter reassembly");

        if frame.sequence < self.expected_next {
            // Duplicate of something already delivered. The peer is likely
            // retransmitting because our ACK got lost.
            trace!(sequence = frame.sequence, "duplicate frame dropped");
            return Ok(Inbound::Duplicate {
                ack: self.expected_next - 1,
            });
        }

        if frame.sequence > self.expected_next {
            self.reassembly.insert(frame.sequence, frame);
            if self.reassembly.len() > self.max_reorder_window {
                return Err(SessionError::ReorderOverflow {
                    buffered: self.reassembly.len(),
                    limit: self.max_reorder_window,
                });
            }
            trace!(buffered = self.reassembly.len(), "frame buffered out of order");
            return Ok(Inbound::Buffered);
        }

        // Exactly the frame we were waiting for: deliver it and drain the
        // contiguous run it unblocks.
        let mut delivered = vec![frame];
        self.expected_next += 1;
        while let Some(next) = self.reassembly.remove(&self.expected_next) {
            delivered.push(next);
            self.expected_next += 1;
        }

        debug!(
            count = delivered.len(),
            ack = self.expected_next - 1,
            "delivering contiguous run"
        );
        Ok(Inbound::Delivered {
            frames: delivered,
            ack: self.expected_next - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn tracker() -> SequenceTracker {
        SequenceTracker::new(&ReliabilityConfig {
            window_size: 4,
            ack_timeout: Duration::from_millis(50),
            max_retries: 3,
            max_reorder_window: 8,
            ack_heartbeat: Duration::from_millis(100),
        })
    }

    fn data(seq: u32) -> Frame {
        Frame::data(seq, Bytes::from(vec![seq as u8]))
    }

    #[test]
    fn in_order_delivery() {
        let mut t = tracker();
        for seq in 0..3 {
            let result = t.accept(data(seq)).unwrap();
            assert_eq!(
                result,
                Inbound::Delivered {
                    frames: vec![data(seq)],
                    ack: seq
                }
            );
        }
        assert_eq!(t.cumulative_ack(), Some(2));
    }

    #[test]
    fn out_of_order_buffered_then_drained() {
        let mut t = tracker();
        assert_eq!(t.accept(data(2)).unwrap(), Inbound::Buffered);
        assert_eq!(t.accept(data(1)).unwrap(), Inbound::Buffered);
        assert_eq!(t.cumulative_ack(), None);

        // Frame 0 unblocks the whole run.
        let result = t.accept(data(0)).unwrap();
        assert_eq!(
            result,
            Inbound::Delivered {
                frames: vec![data(0), data(1), data(2)],
                ack: 2
            }
        );
    }

    #[test]
    fn duplicates_dropped_and_reacked() {
        let mut t = tracker();
        t.accept(data(0)).unwrap();
        t.accept(data(1)).unwrap();

        assert_eq!(t.accept(data(0)).unwrap(), Inbound::Duplicate { ack: 1 });
        // Buffered duplicate of an out-of-order frame is just overwritten.
        assert_eq!(t.accept(data(5)).unwrap(), Inbound::Buffered);
        assert_eq!(t.accept(data(5)).unwrap(), Inbound::Buffered);
    }

    #[test]
    fn reorder_overflow_is_fatal() {
        let mut t = tracker();
        // max_reorder_window = 8; sequence 0 never arrives.
        for seq in 1..=8 {
            assert_eq!(t.accept(data(seq)).unwrap(), Inbound::Buffered);
        }
        let err = t.accept(data(9)).unwrap_err();
        assert_eq!(
            err,
            SessionError::ReorderOverflow {
                buffered: 9,
                limit: 8
            }
        );
    }

    #[test]
    fn window_capacity_and_cumulative_ack() {
        let mut t = tracker();
        for seq in 0..4 {
            assert!(t.has_capacity());
            t.register_sent(data(seq), format!("frame-{seq}"));
        }
        assert!(!t.has_capacity());
        assert_eq!(t.in_flight(), 4);

        // Cumulative: acking 2 releases 0, 1 and 2 at once.
        assert_eq!(t.acknowledge(2), 3);
        assert!(t.has_capacity());
        assert!(t.is_acknowledged(1));
        assert!(!t.is_acknowledged(3));

        // Stale ack is a no-op.
        assert_eq!(t.acknowledge(1), 0);
    }

    #[test]
    fn retransmit_after_timeout_only() {
        let mut t = tracker();
        t.register_sent(data(0), "encoded-0".to_string());

        let now = Instant::now();
        assert_eq!(t.due_for_retransmit(now, Duration::from_secs(60)).unwrap(), None);

        let later = now + Duration::from_secs(61);
        assert_eq!(
            t.due_for_retransmit(later, Duration::from_secs(60)).unwrap(),
            Some("encoded-0".to_string())
        );
        // Timer was reset; not due again immediately.
        assert_eq!(t.due_for_retransmit(later, Duration::from_secs(60)).unwrap(), None);
    }

    #[test]
    fn retransmit_clock_runs_from_actual_transmission() {
        let mut t = tracker();
        let registered = Instant::now();
        t.register_sent(data(0), "encoded-0".to_string());

        // The send completed well after registration (the frame sat behind
        // the rate limiter); the timeout must run from the send.
        let sent = registered + Duration::from_millis(80);
        t.mark_transmitted(0, sent);

        let timeout = Duration::from_millis(50);
        assert_eq!(
            t.due_for_retransmit(sent + Duration::from_millis(40), timeout).unwrap(),
            None
        );
        assert_eq!(
            t.due_for_retransmit(sent + Duration::from_millis(60), timeout).unwrap(),
            Some("encoded-0".to_string())
        );
    }

    #[test]
    fn mark_transmitted_after_ack_is_a_noop() {
        let mut t = tracker();
        t.register_sent(data(0), "encoded-0".to_string());
        t.acknowledge(0);

        // Acknowledged while the send was still in flight: nothing pending.
        t.mark_transmitted(0, Instant::now());
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(t.due_for_retransmit(later, Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn retry_budget_exhaustion() {
        let mut t = tracker();
        t.register_sent(data(0), "encoded-0".to_string());

        let timeout = Duration::from_millis(50);
        let mut now = Instant::now();
        // max_retries = 3: exactly three retransmissions go out.
        for _ in 0..3 {
            now += Duration::from_millis(60);
            assert!(t.due_for_retransmit(now, timeout).unwrap().is_some());
        }
        now += Duration::from_millis(60);
        let err = t.due_for_retransmit(now, timeout).unwrap_err();
        assert_eq!(
            err,
            SessionError::PeerUnresponsive {
                sequence: 0,
                retries: 3
            }
        );
    }

    #[test]
    fn oldest_pending_is_the_retransmit_candidate() {
        let mut t = tracker();
        t.register_sent(data(0), "encoded-0".to_string());
        t.register_sent(data(1), "encoded-1".to_string());

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            t.due_for_retransmit(later, Duration::from_millis(1)).unwrap(),
            Some("encoded-0".to_string())
        );

        // Once 0 is acked, 1 becomes the oldest.
        t.acknowledge(0);
        let much_later = later + Duration::from_secs(1);
        assert_eq!(
            t.due_for_retransmit(much_later, Duration::from_millis(1)).unwrap(),
            Some("encoded-1".to_string())
        );
    }
}
