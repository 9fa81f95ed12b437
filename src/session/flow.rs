//! Outgoing message pacing.
//!
//! The message transport enforces a send-rate limit; blowing through it gets
//! messages rejected or the sender muted. The [`FlowController`] is a token
//! bucket sized from [`RateConfig`]: every transmission (first send, ACK, or
//! retransmission) takes one token, and when the bucket is empty the caller
//! suspends until the next refill or session cancellation.
//!
//! Window backpressure, the other half of flow control, is not here: the
//! pending window bounds in-flight frames and the outbound pump stops
//! reading the local socket while it is full (see
//! [`SequenceTracker::has_capacity`](crate::session::SequenceTracker::has_capacity)).

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::RateConfig;
use crate::error::SessionError;

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Token-bucket rate limiter shared by every sending task of a session.
#[derive(Debug)]
pub struct FlowController {
    state: Mutex<BucketState>,
    capacity: u32,
    refill_period: Duration,
}

impl FlowController {
    /// Controller parameterized by the transport's documented rate limit.
    /// Starts with a full bucket.
    pub fn new(config: &RateConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.burst,
                last_refill: Instant::now(),
            }),
            capacity: config.burst,
            refill_period: config.refill_period(),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        if self.refill_period.is_zero() {
            state.tokens = self.capacity;
            return;
        }
        let elapsed = now.duration_since(state.last_refill);
        let earned = (elapsed.as_nanos() / self.refill_period.as_nanos()) as u32;
        if earned > 0 {
            state.tokens = state.tokens.saturating_add(earned).min(self.capacity);
            // Advance by whole periods only, so fractional progress toward
            // the next token is not lost.
            state.last_refill += self.refill_period * earned;
        }
    }

    /// Take one token without waiting. Returns false when the bucket is dry.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Take one token, suspending until the next refill when the bucket is
    /// dry. Errors only when the session is cancelled mid-wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.refill(&mut state, now);
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return Ok(());
                }
                let toward_next = now.duration_since(state.last_refill);
                self.refill_period.saturating_sub(toward_next)
            };

            trace!(?wait, "rate limited, waiting for token");
            tokio::select! {
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                _ = cancel.cancelled() => {
                    return Err(SessionError::TransportUnavailable(
                        "session cancelled while rate limited".to_string(),
                    ));
                }
            }
        }
    }

    /// Tokens currently available (after refill). Mostly for tests.
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        state.tokens
    }
}
