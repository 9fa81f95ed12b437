//! Session lifecycle tests
//!
//! Clean close handshakes, cancellation, rate pacing, and tolerance of
//! unrelated chatter sharing the channel.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::{Duration, Instant};

use bytes::Bytes;
use message_tunnel::config::TunnelConfig;
use message_tunnel::error::SessionError;
use message_tunnel::session::TunnelSession;
use message_tunnel::transport::memory::{channel_pair, duplex_pair, MemoryReceiver, MemorySender};
use message_tunnel::transport::{
    ByteDuplex, ByteReader, ByteWriter, MessageChannel, MessageSender,
};
use tokio::time::timeout;

/// Channel endpoint built from pre-split halves, so a test can keep a
/// sender clone and inject traffic into the session's receive stream.
struct PreSplit {
    tx: MemorySender,
    rx: MemoryReceiver,
}

impl MessageChannel for PreSplit {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (self.tx, self.rx)
    }
}

fn fast_config() -> TunnelConfig {
    TunnelConfig::default_with_overrides(|c| {
        c.rate.messages_per_interval = 1000;
        c.rate.interval = Duration::from_secs(1);
        c.rate.burst = 200;
        c.reliability.ack_timeout = Duration::from_millis(400);
        c.reliability.ack_heartbeat = Duration::from_millis(100);
    })
}

async fn read_to_end<R: ByteReader>(reader: &mut R) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = reader.read().await.expect("local read failed") {
        out.extend_from_slice(&chunk);
    }
    out
}

#[tokio::test]
async fn clean_close_in_both_directions() {
    let (local_a, app_a) = duplex_pair();
    let (local_b, app_b) = duplex_pair();
    let (chan_a, chan_b) = channel_pair();

    let run_a = tokio::spawn(TunnelSession::new(fast_config()).unwrap().run(local_a, chan_a));
    let run_b = tokio::spawn(TunnelSession::new(fast_config()).unwrap().run(local_b, chan_b));

    let (mut a_reader, mut a_writer) = app_a.split();
    let (mut b_reader, mut b_writer) = app_b.split();

    a_writer.write(Bytes::from_static(b"hello from a")).await.unwrap();
    b_writer.write(Bytes::from_static(b"hello from b")).await.unwrap();
    a_writer.shutdown().await.unwrap();
    b_writer.shutdown().await.unwrap();

    let at_b = timeout(Duration::from_secs(10), read_to_end(&mut b_reader))
        .await
        .expect("a->b stalled");
    let at_a = timeout(Duration::from_secs(10), read_to_end(&mut a_reader))
        .await
        .expect("b->a stalled");

    assert_eq!(at_b, b"hello from a");
    assert_eq!(at_a, b"hello from b");

    // Both sessions exit Ok once every FIN is acknowledged.
    timeout(Duration::from_secs(10), run_a).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), run_b).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn foreign_chatter_does_not_disturb_the_stream() {
    let (local_a, app_a) = duplex_pair();
    let (local_b, app_b) = duplex_pair();
    let (raw_a, chan_b) = channel_pair();

    let (a_tx, a_rx) = raw_a.split();
    let chan_a = PreSplit {
        tx: a_tx.clone(),
        rx: a_rx,
    };
    // Chatter goes out A's sender, so it lands in B's receive stream
    // interleaved with real frames.
    let chatter = a_tx;

    let run_a = tokio::spawn(TunnelSession::new(fast_config()).unwrap().run(local_a, chan_a));
    let run_b = tokio::spawn(TunnelSession::new(fast_config()).unwrap().run(local_b, chan_b));

    let (_a_reader, mut a_writer) = app_a.split();
    let (mut b_reader, mut b_writer) = app_b.split();

    for junk in [
        "hey is this channel free?",
        "0000000000 looks like bot spam",
        "||||||||||||||||||||||",
    ] {
        chatter.send(junk.to_string()).await.unwrap();
    }
    a_writer.write(Bytes::from_static(b"tunnel payload")).await.unwrap();
    chatter.send("more noise".to_string()).await.unwrap();
    a_writer.shutdown().await.unwrap();
    b_writer.shutdown().await.unwrap();

    let at_b = timeout(Duration::from_secs(10), read_to_end(&mut b_reader))
        .await
        .expect("transfer stalled");
    assert_eq!(at_b, b"tunnel payload");

    timeout(Duration::from_secs(10), run_a).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), run_b).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_tears_the_session_down() {
    let (local_a, app_a) = duplex_pair();
    let (chan_a, chan_b) = channel_pair();
    let (_b_tx, _b_rx) = chan_b.split();

    let session = TunnelSession::new(fast_config()).unwrap();
    let cancel = session.cancellation_token();
    let run = tokio::spawn(session.run(local_a, chan_a));

    // Session is mid-handshake; nothing acknowledged yet.
    let (_app_reader, _app_writer) = app_a.split();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    // Caller-driven shutdown is not an error.
    timeout(Duration::from_secs(5), run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn rate_limit_paces_outgoing_messages() {
    let (local_a, app_a) = duplex_pair();
    let (local_b, app_b) = duplex_pair();
    let (chan_a, chan_b) = channel_pair();

    // Two tokens, one refill per 100ms: the third message must wait.
    let config = TunnelConfig::default_with_overrides(|c| {
        c.rate.messages_per_interval = 2;
        c.rate.interval = Duration::from_millis(200);
        c.rate.burst = 2;
        c.reliability.ack_timeout = Duration::from_millis(500);
        c.reliability.ack_heartbeat = Duration::from_secs(60);
    });

    let start = Instant::now();
    let run_a = tokio::spawn(TunnelSession::new(config.clone()).unwrap().run(local_a, chan_a));
    let run_b = tokio::spawn(TunnelSession::new(config).unwrap().run(local_b, chan_b));

    let (_a_reader, mut a_writer) = app_a.split();
    let (mut b_reader, mut b_writer) = app_b.split();

    // Probe, one data frame, FIN: three paced sends on the A side.
    a_writer.write(Bytes::from_static(b"paced")).await.unwrap();
    a_writer.shutdown().await.unwrap();
    b_writer.shutdown().await.unwrap();

    let at_b = timeout(Duration::from_secs(15), read_to_end(&mut b_reader))
        .await
        .expect("transfer stalled");
    assert_eq!(at_b, b"paced");

    timeout(Duration::from_secs(15), run_a).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(15), run_b).await.unwrap().unwrap().unwrap();

    assert!(
        start.elapsed() >= Duration::from_millis(80),
        "three sends through a 2-token bucket cannot finish inside one refill"
    );
}

#[tokio::test]
async fn invalid_configuration_is_rejected_up_front() {
    let config = TunnelConfig::default_with_overrides(|c| {
        c.reliability.window_size = 0;
    });
    let err = TunnelSession::new(config).unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfig(_)));
    assert!(err.to_string().contains("window_size"));
}
