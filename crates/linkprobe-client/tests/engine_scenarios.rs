//! End-to-end engine behavior over in-memory connections.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use linkprobe_client::{EngineConfig, EngineError, ProbeEngine, ProbeEvent, ProbeObserver};
use linkprobe_core::{Message, Probe};
use linkprobe_net::{Connection, Connector};
use linkprobe_protocol::{decode, encode_to_vec, PacketReader};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the test cares about from each event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    ConnectFailed(u32),
    Connected,
    Sent(u64),
    Received(u64),
    Lost { expected: u64, got: u64 },
    NoExpectation(u64),
    ConnectionError(Failure),
    ShuttingDown,
}

/// Coarse reason an epoch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Write,
    WriteTimeout,
    ReadTimeout,
    Protocol,
    Closed,
    Other,
}

impl From<&EngineError> for Failure {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Write(_) => Failure::Write,
            EngineError::WriteTimeout(_) => Failure::WriteTimeout,
            EngineError::ReadTimeout(_) => Failure::ReadTimeout,
            e if e.is_protocol() => Failure::Protocol,
            e if e.is_peer_closed() || e.is_stalled() => Failure::Closed,
            _ => Failure::Other,
        }
    }
}

struct Recorder(mpsc::UnboundedSender<Seen>);

impl ProbeObserver for Recorder {
    fn on_event(&self, event: &ProbeEvent) {
        let seen = match event {
            ProbeEvent::ConnectFailed { attempt, .. } => Seen::ConnectFailed(*attempt),
            ProbeEvent::Connected { .. } => Seen::Connected,
            ProbeEvent::Sent { probe } => Seen::Sent(probe.id),
            ProbeEvent::Received { probe, .. } => Seen::Received(probe.id),
            ProbeEvent::Lost { expected, got } => Seen::Lost {
                expected: *expected,
                got: *got,
            },
            ProbeEvent::NoExpectation { probe } => Seen::NoExpectation(probe.id),
            ProbeEvent::ConnectionError { error } => Seen::ConnectionError(error.into()),
            ProbeEvent::ShuttingDown => Seen::ShuttingDown,
        };
        let _ = self.0.send(seen);
    }
}

/// How the client side of each dialed pipe writes.
#[derive(Debug, Clone, Copy)]
enum Writes {
    Through,
    Fail,
    Stall,
}

/// Every write fails with a broken pipe.
struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Every write waits forever.
struct StalledWriter;

impl AsyncWrite for StalledWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Hands the server end of each dialed duplex pipe to the test.
/// The first `failures` dials are refused.
struct DuplexConnector {
    peers: mpsc::UnboundedSender<DuplexStream>,
    failures: AtomicUsize,
    dials: Arc<AtomicUsize>,
    writes: Writes,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn dial(&self, _addr: &str) -> io::Result<Connection> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }

        let (client, server) = tokio::io::duplex(4096);
        self.peers
            .send(server)
            .map_err(|_| io::Error::from(io::ErrorKind::NotConnected))?;

        let (reader, writer) = tokio::io::split(client);
        Ok(match self.writes {
            Writes::Through => Connection::new(reader, writer, None),
            Writes::Fail => Connection::new(reader, FailingWriter, None),
            Writes::Stall => Connection::new(reader, StalledWriter, None),
        })
    }
}

struct Harness {
    events: mpsc::UnboundedReceiver<Seen>,
    peers: mpsc::UnboundedReceiver<DuplexStream>,
    cancel: CancellationToken,
    engine: JoinHandle<()>,
    dials: Arc<AtomicUsize>,
}

fn config() -> EngineConfig {
    EngineConfig {
        backoff: Duration::from_millis(500),
        send_interval: Duration::from_secs(1),
        read_timeout: Duration::from_secs(30),
        write_timeout: Duration::from_secs(5),
        buffer_size: 1500,
    }
}

fn start(failures: usize) -> Harness {
    start_with(failures, Writes::Through)
}

fn start_with(failures: usize, writes: Writes) -> Harness {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (peer_tx, peers) = mpsc::unbounded_channel();
    let dials = Arc::new(AtomicUsize::new(0));

    let engine = ProbeEngine::new(
        "test",
        config(),
        Arc::new(DuplexConnector {
            peers: peer_tx,
            failures: AtomicUsize::new(failures),
            dials: Arc::clone(&dials),
            writes,
        }),
        Arc::new(Recorder(event_tx)),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let engine = {
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    Harness {
        events,
        peers,
        cancel,
        engine,
        dials,
    }
}

impl Harness {
    async fn next_event(&mut self) -> Seen {
        self.events.recv().await.expect("engine dropped its observer")
    }

    async fn next_peer(&mut self) -> DuplexStream {
        self.peers.recv().await.expect("engine stopped dialing")
    }

    /// Collect events until `last` is seen, inclusive.
    async fn until(&mut self, last: Seen) -> Vec<Seen> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = event == last;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    async fn stop(mut self) -> Vec<Seen> {
        self.cancel.cancel();
        self.engine.await.unwrap();

        let mut rest = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            rest.push(event);
        }
        rest
    }
}

async fn read_probe(reader: &mut PacketReader<tokio::io::ReadHalf<DuplexStream>>) -> Probe {
    match decode(reader).await.unwrap() {
        Message::Probe(p) => p,
    }
}

async fn write_probe(writer: &mut tokio::io::WriteHalf<DuplexStream>, probe: Probe) {
    let frame = encode_to_vec(&probe.into()).unwrap();
    writer.write_all(&frame).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn in_order_echoes_all_match() {
    let mut h = start(0);
    let peer = h.next_peer().await;

    tokio::spawn(async move {
        let (r, mut w) = tokio::io::split(peer);
        let mut r = PacketReader::new(r, 1500);
        for _ in 0..3 {
            let probe = read_probe(&mut r).await;
            write_probe(&mut w, probe).await;
        }
        // Keep the connection open.
        std::future::pending::<()>().await;
    });

    let events = h.until(Seen::Received(3)).await;
    let rest = h.stop().await;

    assert_eq!(events[0], Seen::Connected);
    let received: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Seen::Received(_)))
        .cloned()
        .collect();
    assert_eq!(
        received,
        vec![Seen::Received(1), Seen::Received(2), Seen::Received(3)]
    );
    assert!(!events.iter().any(|e| matches!(e, Seen::Lost { .. })));
    assert!(!events.iter().any(|e| matches!(e, Seen::NoExpectation(_))));
    assert_eq!(rest.last(), Some(&Seen::ShuttingDown));
}

#[tokio::test(start_paused = true)]
async fn gap_reports_loss_and_leaves_later_probes_outstanding() {
    let mut h = start(0);
    let peer = h.next_peer().await;

    tokio::spawn(async move {
        let (r, mut w) = tokio::io::split(peer);
        let mut r = PacketReader::new(r, 1500);
        let mut second = None;
        for _ in 0..3 {
            let probe = read_probe(&mut r).await;
            if probe.id == 2 {
                second = Some(probe);
            }
        }
        if let Some(p) = second {
            write_probe(&mut w, p).await;
        }
        std::future::pending::<()>().await;
    });

    let events = h.until(Seen::Received(2)).await;
    let rest = h.stop().await;

    let sent: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Seen::Sent(id) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![1, 2, 3]);

    let tail = &events[events.len() - 2..];
    assert_eq!(
        tail,
        &[Seen::Lost { expected: 1, got: 2 }, Seen::Received(2)]
    );

    // 3 is never matched nor dropped before shutdown.
    let all: Vec<_> = events.iter().chain(rest.iter()).collect();
    assert!(!all.contains(&&Seen::Received(3)));
    assert!(!all.iter().any(|e| matches!(e, Seen::Lost { expected: 3, .. })));
}

#[tokio::test(start_paused = true)]
async fn unknown_response_is_not_fatal() {
    let mut h = start(0);
    let peer = h.next_peer().await;

    tokio::spawn(async move {
        let (r, mut w) = tokio::io::split(peer);
        let mut r = PacketReader::new(r, 1500);
        read_probe(&mut r).await;
        write_probe(&mut w, Probe::new(42, "stray")).await;
        let second = read_probe(&mut r).await;
        write_probe(&mut w, second).await;
        std::future::pending::<()>().await;
    });

    let events = h.until(Seen::Received(2)).await;
    h.stop().await;

    assert!(events.contains(&Seen::Lost {
        expected: 1,
        got: 42
    }));
    assert!(events.contains(&Seen::NoExpectation(42)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Seen::ConnectionError(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_dial_backs_off_and_retries() {
    let mut h = start(2);

    assert_eq!(h.next_event().await, Seen::ConnectFailed(1));
    assert_eq!(h.next_event().await, Seen::ConnectFailed(2));
    assert_eq!(h.next_event().await, Seen::Connected);

    let _peer = h.next_peer().await;
    assert_eq!(h.next_event().await, Seen::Sent(1));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn peer_close_ends_epoch_and_ids_restart() {
    let mut h = start(0);
    let peer = h.next_peer().await;

    assert_eq!(h.next_event().await, Seen::Connected);
    assert_eq!(h.next_event().await, Seen::Sent(1));
    drop(peer);

    assert_eq!(h.next_event().await, Seen::ConnectionError(Failure::Closed));
    assert_eq!(h.next_event().await, Seen::Connected);

    let _peer = h.next_peer().await;
    assert_eq!(h.next_event().await, Seen::Sent(1));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_peer_hits_read_timeout() {
    let mut h = start(0);
    let _peer = h.next_peer().await;

    let events = h.until(Seen::ConnectionError(Failure::ReadTimeout)).await;
    h.stop().await;

    // Probes keep going out until the 30s read deadline expires.
    let sent = events.iter().filter(|e| matches!(e, Seen::Sent(_))).count();
    assert!(sent >= 29, "sent {} probes", sent);
    assert!(!events.iter().any(|e| matches!(e, Seen::Received(_))));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_connected_stops_without_error() {
    let mut h = start(0);
    let _peer = h.next_peer().await;
    assert_eq!(h.next_event().await, Seen::Connected);

    let rest = h.stop().await;
    assert_eq!(rest, vec![Seen::ShuttingDown]);
}

#[tokio::test(start_paused = true)]
async fn write_failure_ends_epoch_and_redials() {
    let mut h = start_with(0, Writes::Fail);
    let _first = h.next_peer().await;

    assert_eq!(h.next_event().await, Seen::Connected);
    assert_eq!(h.next_event().await, Seen::ConnectionError(Failure::Write));
    assert_eq!(h.next_event().await, Seen::Connected);

    let _second = h.next_peer().await;
    let rest = h.stop().await;
    assert!(!rest.iter().any(|e| matches!(e, Seen::Sent(_))));
}

#[tokio::test(start_paused = true)]
async fn stuck_write_hits_write_timeout() {
    let mut h = start_with(0, Writes::Stall);
    let _first = h.next_peer().await;

    assert_eq!(h.next_event().await, Seen::Connected);
    let started = tokio::time::Instant::now();
    assert_eq!(
        h.next_event().await,
        Seen::ConnectionError(Failure::WriteTimeout)
    );
    // First tick after 1s, then the 5s write deadline.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7), "{waited:?}");
    assert_eq!(h.next_event().await, Seen::Connected);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_tag_from_server_ends_epoch_and_ids_restart() {
    let mut h = start(0);
    let peer = h.next_peer().await;

    let (r, mut w) = tokio::io::split(peer);
    let mut r = PacketReader::new(r, 1500);

    assert_eq!(h.next_event().await, Seen::Connected);
    assert_eq!(h.next_event().await, Seen::Sent(1));
    assert_eq!(read_probe(&mut r).await.id, 1);

    w.write_all(b"XYZ\0\0\0\0\0\0\0\x01\0\0").await.unwrap();

    assert_eq!(h.next_event().await, Seen::ConnectionError(Failure::Protocol));
    assert_eq!(h.next_event().await, Seen::Connected);

    let _second = h.next_peer().await;
    assert_eq!(h.next_event().await, Seen::Sent(1));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_without_dialing_again() {
    let mut h = start(usize::MAX);

    assert_eq!(h.next_event().await, Seen::ConnectFailed(1));
    let dials = Arc::clone(&h.dials);

    let rest = h.stop().await;
    assert_eq!(rest, vec![Seen::ShuttingDown]);
    assert_eq!(dials.load(Ordering::SeqCst), 1);
}
