//! The probe engine: connection lifecycle, periodic send and response
//! reconciliation.
//!
//! Each successful dial starts a connection epoch with a fresh ID counter
//! and expectation queue. Within an epoch two tasks cooperate:
//!
//! - a decode task that reads one frame at a time (each under its own
//!   read deadline) and hands the result over a single-slot channel;
//! - the main loop, which multiplexes the send timer, decoded responses
//!   and cancellation.
//!
//! Any transport or protocol failure ends the epoch. The engine then waits
//! the backoff and dials again; only cancellation stops it.

use std::sync::Arc;
use std::time::Duration;

use linkprobe_core::{ExpectationQueue, Message, Probe};
use linkprobe_net::{BoxedReader, BoxedWriter, Connection, Connector};
use linkprobe_protocol::{decode, encode, wire_types::probe_frame_len, PacketReader};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

use crate::config::ConfigError;
use crate::error::EngineError;
use crate::events::{ProbeEvent, ProbeObserver};

/// Timing and sizing for the engine. All values are required.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wait between a failed dial or a failed epoch and the next dial.
    pub backoff: Duration,

    /// Period of the send timer. Must be non-zero.
    pub send_interval: Duration,

    /// Deadline for decoding one response.
    pub read_timeout: Duration,

    /// Deadline for writing one probe.
    pub write_timeout: Duration,

    /// Receive buffer; must hold the largest expected datagram.
    pub buffer_size: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be greater than zero"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer size must be greater than zero"));
        }
        Ok(())
    }
}

/// A decoded response, stamped when decoding completed.
#[derive(Debug)]
struct Response {
    received_at: Instant,
    probe: Probe,
}

type DecodeResult = Result<Response, EngineError>;

/// How an epoch ended.
enum EpochEnd {
    Cancelled,
    Failed(EngineError),
}

pub struct ProbeEngine {
    addr: String,
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    observer: Arc<dyn ProbeObserver>,
}

impl ProbeEngine {
    pub fn new(
        addr: impl Into<String>,
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn ProbeObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ProbeEngine {
            addr: addr.into(),
            config,
            connector,
            observer,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut failed_dials: u32 = 0;

        loop {
            let dialed = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.connector.dial(&self.addr) => res,
            };

            match dialed {
                Ok(conn) => {
                    failed_dials = 0;
                    self.emit(ProbeEvent::Connected { peer: conn.peer });

                    match self.run_epoch(conn, &cancel).await {
                        EpochEnd::Cancelled => break,
                        EpochEnd::Failed(error) => {
                            self.emit(ProbeEvent::ConnectionError { error });
                        }
                    }
                }
                Err(e) => {
                    failed_dials = failed_dials.saturating_add(1);
                    self.emit(ProbeEvent::ConnectFailed {
                        attempt: failed_dials,
                        error: EngineError::Dial(e),
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.backoff) => {}
            }
        }

        self.emit(ProbeEvent::ShuttingDown);
    }

    async fn run_epoch(&self, conn: Connection, cancel: &CancellationToken) -> EpochEnd {
        let Connection { reader, writer, .. } = conn;

        let (tx, rx) = mpsc::channel(1);
        let reader = PacketReader::new(reader, self.config.buffer_size);
        // Aborted when the epoch ends, whichever way it ends.
        let _decoder = AbortOnDropHandle::new(tokio::spawn(decode_responses(
            reader,
            self.config.read_timeout,
            tx,
        )));

        let mut epoch = Epoch {
            engine: self,
            writer,
            responses: rx,
            queue: ExpectationQueue::new(),
            next_id: 1,
            frame: Vec::with_capacity(probe_frame_len(32)),
        };

        match epoch.run(cancel).await {
            Ok(()) => EpochEnd::Cancelled,
            Err(e) => EpochEnd::Failed(e),
        }
        // `epoch` drops its writer here and `_decoder` aborts the read side.
    }

    fn emit(&self, event: ProbeEvent) {
        self.observer.on_event(&event);
    }
}

/// State owned by one connection epoch.
struct Epoch<'a> {
    engine: &'a ProbeEngine,
    writer: BoxedWriter,
    responses: mpsc::Receiver<DecodeResult>,
    queue: ExpectationQueue,
    next_id: u64,
    frame: Vec<u8>,
}

impl Epoch<'_> {
    /// Returns `Ok(())` on cancellation, the failure otherwise.
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let period = self.engine.config.send_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        res = self.send_next() => res?,
                    };
                    self.engine.emit(ProbeEvent::Sent { probe: sent });
                }

                msg = self.responses.recv() => {
                    match msg {
                        Some(Ok(response)) => self.reconcile(response),
                        Some(Err(e)) => return Err(e),
                        None => return Err(EngineError::DecoderStopped),
                    }
                }
            }
        }
    }

    /// Write the next probe and record its expectation.
    async fn send_next(&mut self) -> Result<Probe, EngineError> {
        let probe = Probe::hello(self.next_id);
        let write_timeout = self.engine.config.write_timeout;

        self.frame.clear();
        encode(&Message::Probe(probe.clone()), &mut self.frame).map_err(EngineError::Encode)?;

        match timeout(write_timeout, self.writer.write_all(&self.frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(EngineError::Write(e)),
            Err(_) => return Err(EngineError::WriteTimeout(write_timeout)),
        }

        self.queue.push(Instant::now(), probe.clone());
        self.next_id += 1;
        Ok(probe)
    }

    fn reconcile(&mut self, response: Response) {
        let outcome = self.queue.reconcile(&response.probe, response.received_at);
        let got = response.probe.id;

        for lost in &outcome.lost {
            self.engine.emit(ProbeEvent::Lost {
                expected: lost.probe.id,
                got,
            });
        }

        let event = match outcome.matched {
            Some(m) => ProbeEvent::Received {
                probe: response.probe,
                latency: m.latency,
            },
            None => ProbeEvent::NoExpectation {
                probe: response.probe,
            },
        };
        self.engine.emit(event);

        debug!(outstanding = self.queue.len(), "reconciled response");
    }
}

/// Decode responses until one fails or the receiver goes away.
///
/// The channel slot is reserved before each read, so nothing is decoded
/// while a previous result is still waiting for the main loop.
async fn decode_responses(
    mut reader: PacketReader<BoxedReader>,
    read_timeout: Duration,
    tx: mpsc::Sender<DecodeResult>,
) {
    loop {
        let Ok(permit) = tx.reserve().await else {
            return;
        };

        let result = match timeout(read_timeout, decode(&mut reader)).await {
            Ok(Ok(Message::Probe(probe))) => Ok(Response {
                received_at: Instant::now(),
                probe,
            }),
            Ok(Err(e)) => Err(EngineError::Decode(e)),
            Err(_) => Err(EngineError::ReadTimeout(read_timeout)),
        };

        let terminal = result.is_err();
        permit.send(result);
        if terminal {
            return;
        }
    }
}
