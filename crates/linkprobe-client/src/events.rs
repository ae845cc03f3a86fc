//! Engine events and their observers.
//!
//! The engine never logs directly. Everything worth reporting is handed
//! to a [`ProbeObserver`] as a [`ProbeEvent`]; [`TracingObserver`] is the
//! default rendering.

use std::net::SocketAddr;
use std::time::Duration;

use linkprobe_core::Probe;
use tracing::{error, info, warn};

use crate::error::EngineError;

#[derive(Debug)]
pub enum ProbeEvent {
    /// Dial failed; `attempt` counts consecutive failures.
    ConnectFailed { attempt: u32, error: EngineError },

    Connected { peer: Option<SocketAddr> },

    Sent { probe: Probe },

    /// A response matched the oldest outstanding probe with its ID.
    Received { probe: Probe, latency: Duration },

    /// An outstanding probe was skipped by a later response.
    Lost { expected: u64, got: u64 },

    /// No outstanding probe matched the response.
    NoExpectation { probe: Probe },

    /// The epoch ended; a redial follows after the backoff.
    ConnectionError { error: EngineError },

    ShuttingDown,
}

pub trait ProbeObserver: Send + Sync {
    fn on_event(&self, event: &ProbeEvent);
}

impl<F> ProbeObserver for F
where
    F: Fn(&ProbeEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProbeEvent) {
        self(event)
    }
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProbeObserver for TracingObserver {
    fn on_event(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::ConnectFailed { attempt, error } => {
                error!(attempt, %error, "Could not connect to server");
            }
            ProbeEvent::Connected { peer } => {
                info!(?peer, "Connected to server");
            }
            ProbeEvent::Sent { probe } => {
                info!(id = probe.id, data = %probe.data, "Message sent");
            }
            ProbeEvent::Received { probe, latency } => {
                info!(id = probe.id, data = %probe.data, took = ?latency, "Message received");
            }
            ProbeEvent::Lost { expected, got } => {
                warn!(expected_id = expected, got_id = got, "Message dropped");
            }
            ProbeEvent::NoExpectation { probe } => {
                error!(id = probe.id, data = %probe.data, "No expectation found");
            }
            ProbeEvent::ConnectionError { error } if error.is_peer_closed() => {
                info!(%error, "Connection closed by server");
            }
            ProbeEvent::ConnectionError { error } if error.is_stalled() => {
                warn!(%error, "Connection ended: no data from server");
            }
            ProbeEvent::ConnectionError { error } => {
                error!(%error, protocol = error.is_protocol(), "Connection error");
            }
            ProbeEvent::ShuttingDown => {
                info!("Shutting down");
            }
        }
    }
}
