//! Full-duplex tunnel session orchestration.
//!
//! A [`TunnelSession`] owns every piece of mutable state for one tunneled
//! connection and runs three tasks for its lifetime:
//!
//! - the **outbound pump**: local byte stream → chunker → window slot →
//!   rate limiter → message transport;
//! - the **inbound pump**: message transport → decoder → sequence tracker →
//!   local byte stream, acknowledging as it delivers;
//! - the **timer**: retransmits the oldest unacknowledged frame on ACK
//!   timeout and re-sends the cumulative ACK during idle periods.
//!
//! Tracker state is shared behind a single mutex; the lock is never held
//! across an await. A [`CancellationToken`] reaches every suspension point,
//! so a fatal error in any task (or a caller-driven shutdown) tears the
//! whole session down promptly; no task outlives the session.
//!
//! Each direction walks `Idle → Active → Closing → Closed`. The outbound
//! direction opens with an empty sequence-0 DATA frame as a liveness probe,
//! turns Active on the first ACK, and closes via an acknowledged FIN. The
//! inbound direction turns Active on the first valid frame and closes when
//! a FIN is delivered in order, at which point the local write side shuts
//! down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::TunnelConfig;
use crate::core::codec::{FrameCodec, Framer};
use crate::core::frame::Frame;
use crate::error::{FrameError, SessionError};
use crate::session::flow::FlowController;
use crate::session::tracker::{Inbound, SequenceTracker};
use crate::transport::{
    send_with_retry, ByteDuplex, ByteReader, ByteWriter, MessageChannel, MessageReceiver,
    MessageSender,
};

/// Lifecycle of one direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    /// Nothing exchanged yet.
    Idle,
    /// Frames flowing.
    Active,
    /// End-of-stream initiated; waiting for the FIN to settle.
    Closing,
    /// Direction finished.
    Closed,
}

/// Everything mutable, guarded by one lock (single-lock discipline: the
/// pending window and reassembly buffer are the session's only shared-
/// mutable-state hazard).
struct State {
    tracker: SequenceTracker,
    framer: Framer,
    outbound: DirectionState,
    inbound: DirectionState,
    /// Sequence number of our FIN, once sent.
    fin_sequence: Option<u32>,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when ACKs free pending-window capacity.
    window_free: Notify,
    /// Signalled when our FIN is acknowledged.
    fin_settled: Notify,
    flow: FlowController,
    codec: FrameCodec,
    config: TunnelConfig,
    cancel: CancellationToken,
}

impl Shared {
    /// Both directions done?
    fn finished(state: &State) -> bool {
        state.outbound == DirectionState::Closed && state.inbound == DirectionState::Closed
    }
}

/// One bidirectional tunnel between a local byte stream and a message
/// transport. Create it, then [`run`](Self::run) it to completion.
#[derive(Debug)]
pub struct TunnelSession {
    config: TunnelConfig,
    cancel: CancellationToken,
}

impl TunnelSession {
    /// Session with the given configuration. Fails fast on invalid config.
    pub fn new(config: TunnelConfig) -> crate::error::Result<Self> {
        config.validate_strict()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that shuts the session down when cancelled. Cloneable; hand it
    /// to whatever supervises the session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the session until both directions close or a fatal error ends
    /// it. Either way every task is torn down and both endpoints released
    /// before this returns.
    #[instrument(skip_all, fields(window = self.config.reliability.window_size))]
    pub async fn run<D, C>(self, duplex: D, channel: C) -> crate::error::Result<()>
    where
        D: ByteDuplex,
        C: MessageChannel,
    {
        let (reader, writer) = duplex.split();
        let (sender, receiver) = channel.split();

        let max_payload = self.config.max_payload();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tracker: SequenceTracker::new(&self.config.reliability),
                framer: Framer::new(max_payload),
                outbound: DirectionState::Idle,
                inbound: DirectionState::Idle,
                fin_sequence: None,
            }),
            window_free: Notify::new(),
            fin_settled: Notify::new(),
            flow: FlowController::new(&self.config.rate),
            codec: FrameCodec::new(self.config.frame.transport_max_chars),
            config: self.config,
            cancel: self.cancel,
        });

        info!(max_payload, "tunnel session starting");

        let outbound = tokio::spawn(outbound_pump(Arc::clone(&shared), reader, sender.clone()));
        let inbound = tokio::spawn(inbound_pump(Arc::clone(&shared), receiver, writer, sender.clone()));
        let timer = tokio::spawn(timer_task(Arc::clone(&shared), sender));

        let (outbound, inbound, timer) = tokio::join!(outbound, inbound, timer);

        // The first fatal error wins; joined panics are reported, not
        // propagated as panics.
        let mut result = Ok(());
        for task in [outbound, inbound, timer] {
            match task {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(join_err) => {
                    if result.is_ok() {
                        result = Err(SessionError::TransportUnavailable(format!(
                            "session task failed: {join_err}"
                        )));
                    }
                }
            }
        }

        match &result {
            Ok(()) => info!("tunnel session closed cleanly"),
            Err(e) => warn!(error = %e, "tunnel session terminated"),
        }
        result
    }
}

/// Escalate a task failure: the first task to fail cancels the session and
/// keeps its error; failures observed after cancellation are artifacts of
/// the teardown (interrupted rate-limit waits and the like) and wind down
/// quietly so they cannot mask the original reason.
fn escalate(shared: &Shared, error: SessionError) -> crate::error::Result<()> {
    if shared.cancel.is_cancelled() {
        debug!(%error, "suppressing post-cancellation error");
        return Ok(());
    }
    shared.cancel.cancel();
    Err(error)
}

/// Reserve a pending-window slot and register `frame` as sent, then ship it
/// through the rate limiter. Suspends while the window is full; that pause
/// is what stops the local read loop when the peer falls behind.
async fn transmit_sequenced<S: MessageSender>(
    shared: &Shared,
    sender: &S,
    frame: Frame,
) -> crate::error::Result<()> {
    let encoded = shared.codec.encode(&frame);
    let sequence = frame.sequence;

    loop {
        // Arm the notification before checking, so a concurrent ACK between
        // the check and the wait cannot be missed.
        let window_free = shared.window_free.notified();
        {
            let mut state = shared.state.lock().await;
            if state.tracker.has_capacity() {
                if frame.is_fin() {
                    state.fin_sequence = Some(frame.sequence);
                }
                state.tracker.register_sent(frame, encoded.clone());
                break;
            }
        }
        trace!("pending window full, read loop paused");
        tokio::select! {
            _ = window_free => {}
            _ = shared.cancel.cancelled() => return Ok(()),
        }
    }

    shared.flow.acquire(&shared.cancel).await?;
    send_with_retry(sender, &encoded, &shared.config.transport, &shared.cancel).await?;

    // The ACK timeout runs from the moment the frame actually left, not from
    // registration; under token contention those can be far apart.
    let mut state = shared.state.lock().await;
    state.tracker.mark_transmitted(sequence, Instant::now());
    Ok(())
}

/// Encode and send a cumulative ACK. ACKs take rate-limiter tokens like any
/// other message but bypass the pending window.
async fn send_ack<S: MessageSender>(
    shared: &Shared,
    sender: &S,
    ack: u32,
) -> crate::error::Result<()> {
    let encoded = shared.codec.encode(&Frame::ack(ack));
    shared.flow.acquire(&shared.cancel).await?;
    send_with_retry(sender, &encoded, &shared.config.transport, &shared.cancel).await
}

/// Local byte stream → message transport.
async fn outbound_pump<R, S>(
    shared: Arc<Shared>,
    mut reader: R,
    sender: S,
) -> crate::error::Result<()>
where
    R: ByteReader,
    S: MessageSender,
{
    // Liveness probe opens the direction.
    let probe = {
        let mut state = shared.state.lock().await;
        match state.framer.probe() {
            Ok(probe) => probe,
            Err(e) => return escalate(&shared, e),
        }
    };
    if let Err(e) = transmit_sequenced(&shared, &sender, probe).await {
        return escalate(&shared, e);
    }

    loop {
        let read = tokio::select! {
            read = reader.read() => read,
            _ = shared.cancel.cancelled() => return Ok(()),
        };

        match read {
            Ok(Some(bytes)) => {
                let frames = {
                    let mut state = shared.state.lock().await;
                    match state.framer.push(&bytes) {
                        Ok(frames) => frames,
                        Err(e) => return escalate(&shared, e),
                    }
                };
                for frame in frames {
                    if let Err(e) = transmit_sequenced(&shared, &sender, frame).await {
                        return escalate(&shared, e);
                    }
                    if shared.cancel.is_cancelled() {
                        return Ok(());
                    }
                }
            }
            Ok(None) => {
                debug!("local read side reached end of stream");
                break;
            }
            Err(e) => {
                // Local socket died mid-read; close the tunnel for it.
                warn!(error = %e, "local read failed, closing session");
                shared.cancel.cancel();
                return Ok(());
            }
        }
    }

    // End of local stream: send FIN and wait for it to be acknowledged.
    let fin = {
        let mut state = shared.state.lock().await;
        state.outbound = DirectionState::Closing;
        match state.framer.fin() {
            Ok(fin) => fin,
            Err(e) => return escalate(&shared, e),
        }
    };
    debug!(sequence = fin.sequence, "sending FIN");
    if let Err(e) = transmit_sequenced(&shared, &sender, fin).await {
        return escalate(&shared, e);
    }

    loop {
        let settled = shared.fin_settled.notified();
        {
            let state = shared.state.lock().await;
            if state.outbound == DirectionState::Closed {
                break;
            }
        }
        tokio::select! {
            _ = settled => {}
            _ = shared.cancel.cancelled() => return Ok(()),
        }
    }

    debug!("outbound direction closed");
    let mut state = shared.state.lock().await;
    if Shared::finished(&state) {
        shared.cancel.cancel();
    }
    drop(state);
    Ok(())
}

/// Message transport → local byte stream.
async fn inbound_pump<Rx, W, S>(
    shared: Arc<Shared>,
    mut receiver: Rx,
    mut writer: W,
    sender: S,
) -> crate::error::Result<()>
where
    Rx: MessageReceiver,
    W: ByteWriter,
    S: MessageSender,
{
    loop {
        let message = tokio::select! {
            message = receiver.recv() => message,
            _ = shared.cancel.cancelled() => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let Some(text) = message else {
            let finished = {
                let state = shared.state.lock().await;
                Shared::finished(&state)
            };
            let _ = writer.shutdown().await;
            if finished {
                shared.cancel.cancel();
                return Ok(());
            }
            return escalate(
                &shared,
                SessionError::TransportUnavailable("receive stream ended mid-session".to_string()),
            );
        };

        let frame = match shared.codec.decode(&text) {
            Ok(frame) => frame,
            Err(FrameError::Foreign) => {
                trace!("ignoring non-tunnel message");
                continue;
            }
            Err(e) => {
                // Corrupted or inconsistent frame: drop it and let the
                // peer's retransmission timer recover the data.
                debug!(error = %e, "dropping bad frame");
                continue;
            }
        };

        if frame.is_sequenced() {
            match handle_sequenced(&shared, &sender, &mut writer, frame).await {
                Ok(true) => {}
                Ok(false) => {
                    // Session complete or local writer gone.
                    return Ok(());
                }
                Err(e) => {
                    let _ = writer.shutdown().await;
                    return escalate(&shared, e);
                }
            }
        } else {
            handle_ack(&shared, frame.sequence).await;
        }
    }
}

/// Process one incoming ACK: drain the pending window, activate the
/// outbound direction, settle the FIN when covered.
async fn handle_ack(shared: &Shared, acked: u32) {
    let mut state = shared.state.lock().await;
    let released = state.tracker.acknowledge(acked);

    if state.outbound == DirectionState::Idle {
        debug!("first ACK received, outbound direction active");
        state.outbound = DirectionState::Active;
    }

    if let Some(fin_seq) = state.fin_sequence {
        if state.outbound == DirectionState::Closing && state.tracker.is_acknowledged(fin_seq) {
            state.outbound = DirectionState::Closed;
            shared.fin_settled.notify_waiters();
        }
    }

    if released > 0 {
        shared.window_free.notify_waiters();
    }
}

/// Process one incoming DATA or FIN frame. Returns `Ok(false)` when the
/// session should wind down (cleanly) from this task's point of view.
async fn handle_sequenced<W, S>(
    shared: &Shared,
    sender: &S,
    writer: &mut W,
    frame: Frame,
) -> crate::error::Result<bool>
where
    W: ByteWriter,
    S: MessageSender,
{
    let outcome = {
        let mut state = shared.state.lock().await;
        if state.inbound == DirectionState::Idle {
            debug!("first frame received, inbound direction active");
            state.inbound = DirectionState::Active;
        }
        state.tracker.accept(frame)?
    };

    match outcome {
        Inbound::Buffered => Ok(true),
        Inbound::Duplicate { ack } => {
            send_ack(shared, sender, ack).await?;
            Ok(true)
        }
        Inbound::Delivered { frames, ack } => {
            let mut fin_delivered = false;
            for frame in &frames {
                if !frame.payload.is_empty() {
                    if let Err(e) = writer.write(frame.payload.clone()).await {
                        warn!(error = %e, "local write failed, closing session");
                        shared.cancel.cancel();
                        return Ok(false);
                    }
                }
                if frame.is_fin() {
                    fin_delivered = true;
                }
            }

            // Acknowledge everything just delivered, FIN included, before
            // tearing anything down: the peer is waiting on it.
            send_ack(shared, sender, ack).await?;

            if fin_delivered {
                debug!("FIN delivered, inbound direction closed");
                if let Err(e) = writer.shutdown().await {
                    warn!(error = %e, "local shutdown failed");
                }
                let mut state = shared.state.lock().await;
                state.inbound = DirectionState::Closed;
                if Shared::finished(&state) {
                    shared.cancel.cancel();
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// Retransmission and ACK-heartbeat timer.
async fn timer_task<S: MessageSender>(shared: Arc<Shared>, sender: S) -> crate::error::Result<()> {
    let ack_timeout = shared.config.reliability.ack_timeout;
    // Check well inside the timeout so retransmission latency stays close
    // to the configured value.
    let scan = (ack_timeout / 4).max(Duration::from_millis(10));
    let mut retransmit = tokio::time::interval(scan);
    let mut heartbeat = tokio::time::interval(shared.config.reliability.ack_heartbeat);
    retransmit.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = retransmit.tick() => {
                let due = {
                    let mut state = shared.state.lock().await;
                    match state.tracker.due_for_retransmit(Instant::now(), ack_timeout) {
                        Ok(due) => due,
                        Err(e) => return escalate(&shared, e),
                    }
                };
                if let Some(encoded) = due {
                    let sent = async {
                        shared.flow.acquire(&shared.cancel).await?;
                        send_with_retry(&sender, &encoded, &shared.config.transport, &shared.cancel)
                            .await
                    }
                    .await;
                    if let Err(e) = sent {
                        return escalate(&shared, e);
                    }
                }
            }
            _ = heartbeat.tick() => {
                let ack = {
                    let state = shared.state.lock().await;
                    if state.inbound == DirectionState::Closed {
                        None
                    } else {
                        state.tracker.cumulative_ack()
                    }
                };
                if let Some(ack) = ack {
                    trace!(ack, "heartbeat ACK");
                    if let Err(e) = send_ack(&shared, &sender, ack).await {
                        return escalate(&shared, e);
                    }
                }
            }
            _ = shared.cancel.cancelled() => return Ok(()),
        }
    }
}
