//! Shared types for the echo server.
//!
//! This module defines:
//! - `ServerState`: lifecycle phase of a `Server`
//! - `ServerError`: outcomes of listening and shutting down
//! - `Handler`: what the server dispatches each accepted connection to
//! - `ListenerId`: handle for a registered listen endpoint

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkprobe_net::PacketConn;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Identifier for a registered listener, unique per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Lifecycle phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    /// Accepting listeners and connections.
    Open,
    /// Shutdown started: no new listeners or connections; handlers may still run.
    Draining,
    /// Every dispatched handler has finished (or the drain gave up).
    Closed,
}

/// Errors are `Clone` so that one shutdown outcome can be handed to every
/// caller.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// The server is shutting down, or already has.
    #[error("server closed")]
    Closed,

    #[error("could not listen on {addr}: {error}")]
    Bind { addr: String, error: Arc<io::Error> },

    #[error("could not accept connection: {0}")]
    Accept(Arc<io::Error>),

    #[error("handlers still running after {0:?}")]
    DrainTimeout(Duration),
}

impl ServerError {
    pub fn is_closed(&self) -> bool {
        matches!(self, ServerError::Closed)
    }
}

/// Serves one accepted connection.
///
/// `closing` fires when the server starts shutting down; a handler should
/// return promptly once it does so that drain can complete. The connection
/// is closed when the handler returns.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, conn: Box<dyn PacketConn>, closing: CancellationToken);
}
