//! Listener lifecycle.
//!
//! A [`Server`] runs any number of accept loops (one per [`Acceptor`]),
//! hands each accepted connection to its [`Handler`] on a task of its own
//! and shuts everything down exactly once:
//!
//! - `close()` flips the state to `Draining` and closes every registered
//!   listener. Accept loops observing this return `ServerError::Closed`.
//! - `shutdown()` closes, then waits for dispatched handlers to finish,
//!   optionally bounded by a drain timeout. Its first outcome is cached
//!   and returned to every caller.
//!
//! A panicking handler is not absorbed: the first panic payload is kept
//! and rethrown from every accept loop and from the drain, so the server
//! never reports a clean shutdown after one.
//!
//! The state and the listener registry live under one mutex, which is
//! never held across an await. Dispatch checks the state under the same
//! lock, so no connection is handed out once shutdown has begun.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkprobe_net::{Acceptor, DatagramAcceptor, PacketConn, Protocol, TcpAcceptor};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::types::{Handler, ListenerId, ServerError, ServerState};

/// A registered listen endpoint.
///
/// The acceptor itself is owned by its accept loop; closing signals the
/// loop to stop and drop it.
#[derive(Debug)]
struct TrackedListener {
    id: ListenerId,
    protocol: Protocol,
    local_addr: Option<SocketAddr>,
    stop: CancellationToken,
    closed: AtomicBool,
}

impl TrackedListener {
    /// Returns `true` only for the call that actually closed it.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop.cancel();
        true
    }
}

#[derive(Debug)]
struct Registry {
    state: ServerState,
    listeners: HashMap<ListenerId, Arc<TrackedListener>>,
    next_id: u64,
}

/// First handler panic, kept until something rethrows it.
#[derive(Default)]
struct HandlerPanic {
    payload: Mutex<Option<Box<dyn Any + Send>>>,
    raised: CancellationToken,
}

impl HandlerPanic {
    fn record(&self, payload: Box<dyn Any + Send>) {
        {
            let mut slot = self.payload.lock();
            if slot.is_none() {
                *slot = Some(payload);
            }
        }
        self.raised.cancel();
    }

    /// The first caller gets the original payload, later ones a generic panic.
    fn rethrow(&self) -> ! {
        let payload = self.payload.lock().take();
        match payload {
            Some(payload) => std::panic::resume_unwind(payload),
            None => panic!("connection handler panicked"),
        }
    }
}

struct Inner<H> {
    handler: Arc<H>,
    registry: Mutex<Registry>,
    /// Parent of every handler's `closing` token.
    closing: CancellationToken,
    tasks: TaskTracker,
    drain_timeout: Option<Duration>,
    outcome: OnceCell<Result<(), ServerError>>,
    panicked: Arc<HandlerPanic>,
}

/// Echo-agnostic server: cheap to clone, every clone drives the same
/// listeners and handlers.
pub struct Server<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for Server<H> {
    fn clone(&self) -> Self {
        Server {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Handler> Server<H> {
    pub fn new(handler: H) -> Self {
        Self::with_drain_timeout(handler, None)
    }

    /// `drain_timeout` bounds the wait for handlers in `shutdown()`;
    /// unbounded when `None`.
    pub fn with_drain_timeout(handler: H, drain_timeout: Option<Duration>) -> Self {
        Server {
            inner: Arc::new(Inner {
                handler: Arc::new(handler),
                registry: Mutex::new(Registry {
                    state: ServerState::Open,
                    listeners: HashMap::new(),
                    next_id: 1,
                }),
                closing: CancellationToken::new(),
                tasks: TaskTracker::new(),
                drain_timeout,
                outcome: OnceCell::new(),
                panicked: Arc::default(),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.registry.lock().state
    }

    /// Number of listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.lock().listeners.len()
    }

    /// Number of handler tasks still running.
    pub fn active_handlers(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Bind a TCP listener on `addr` and serve it.
    pub async fn listen_tcp(&self, addr: &str) -> Result<(), ServerError> {
        self.ensure_open()?;
        let acceptor = TcpAcceptor::bind(addr).await.map_err(|e| bind_error(addr, e))?;
        self.serve(acceptor).await
    }

    /// Bind a UDP socket on `addr` and serve it.
    pub async fn listen_udp(&self, addr: &str) -> Result<(), ServerError> {
        self.ensure_open()?;
        let acceptor = DatagramAcceptor::bind(addr)
            .await
            .map_err(|e| bind_error(addr, e))?;
        self.serve(acceptor).await
    }

    /// Bind on `addr` with the given protocol and serve it.
    pub async fn listen(&self, protocol: Protocol, addr: &str) -> Result<(), ServerError> {
        match protocol {
            Protocol::Tcp => self.listen_tcp(addr).await,
            Protocol::Udp => self.listen_udp(addr).await,
        }
    }

    /// Run an accept loop over an already bound acceptor.
    ///
    /// Returns `ServerError::Closed` if the server is shutting down, either
    /// already on entry or once the loop notices. The acceptor is dropped
    /// (and thereby closed) before this returns.
    pub async fn serve<A: Acceptor>(&self, mut acceptor: A) -> Result<(), ServerError> {
        let listener = self.register(&acceptor)?;

        info!(
            protocol = %listener.protocol,
            addr = ?listener.local_addr,
            "Listening"
        );

        let result = self.accept_loop(&mut acceptor, &listener).await;

        self.deregister(&listener);
        listener.close();
        drop(acceptor);

        match &result {
            Err(ServerError::Closed) => {
                info!(protocol = %listener.protocol, addr = ?listener.local_addr, "Listener stopped");
            }
            Err(e) => {
                error!(protocol = %listener.protocol, addr = ?listener.local_addr, error = %e, "Listener failed");
            }
            Ok(()) => {}
        }
        result
    }

    async fn accept_loop<A: Acceptor>(
        &self,
        acceptor: &mut A,
        listener: &TrackedListener,
    ) -> Result<(), ServerError> {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.panicked.raised.cancelled() => self.inner.panicked.rethrow(),
                _ = listener.stop.cancelled() => return Err(ServerError::Closed),
                res = acceptor.accept() => res,
            };

            match accepted {
                Ok(conn) => self.dispatch(conn)?,
                Err(_) if self.is_shutting_down() => return Err(ServerError::Closed),
                Err(e) => return Err(ServerError::Accept(Arc::new(e))),
            }
        }
    }

    /// Hand `conn` to the handler on its own task, unless shutdown began.
    fn dispatch(&self, conn: Box<dyn PacketConn>) -> Result<(), ServerError> {
        let registry = self.inner.registry.lock();
        if registry.state != ServerState::Open {
            debug!("dropping connection accepted during shutdown");
            return Err(ServerError::Closed);
        }

        let handler = Arc::clone(&self.inner.handler);
        let closing = self.inner.closing.child_token();
        let panicked = Arc::clone(&self.inner.panicked);
        self.inner.tasks.spawn(async move {
            let served = tokio::spawn(async move { handler.serve(conn, closing).await });
            if let Err(e) = served.await {
                if e.is_panic() {
                    error!("Connection handler panicked");
                    panicked.record(e.into_panic());
                }
            }
        });
        Ok(())
    }

    /// Stop accepting and close every listener. Does not wait for handlers.
    pub fn close(&self) {
        let listeners: Vec<Arc<TrackedListener>> = {
            let mut registry = self.inner.registry.lock();
            if registry.state == ServerState::Open {
                registry.state = ServerState::Draining;
            }
            registry.listeners.drain().map(|(_, l)| l).collect()
        };

        for listener in listeners {
            if listener.close() {
                debug!(id = listener.id.0, protocol = %listener.protocol, "closed listener");
            }
        }

        self.inner.closing.cancel();
        self.inner.tasks.close();
    }

    /// Close, then wait for every dispatched handler to finish.
    ///
    /// Safe to call any number of times from any number of tasks; they all
    /// get the outcome of the first call.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.inner
            .outcome
            .get_or_init(|| self.drain())
            .await
            .clone()
    }

    async fn drain(&self) -> Result<(), ServerError> {
        self.close();

        let pending = self.inner.tasks.len();
        if pending > 0 {
            debug!(pending, "waiting for handlers");
        }

        let outcome = match self.inner.drain_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.tasks.wait())
                .await
                .map_err(|_| ServerError::DrainTimeout(limit)),
            None => {
                self.inner.tasks.wait().await;
                Ok(())
            }
        };

        if self.inner.panicked.raised.is_cancelled() {
            self.inner.panicked.rethrow();
        }

        if let Err(e) = &outcome {
            warn!(remaining = self.inner.tasks.len(), error = %e, "Drain incomplete");
        }

        self.inner.registry.lock().state = ServerState::Closed;
        outcome
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.is_shutting_down() {
            return Err(ServerError::Closed);
        }
        Ok(())
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.registry.lock().state != ServerState::Open
    }

    fn register<A: Acceptor>(&self, acceptor: &A) -> Result<Arc<TrackedListener>, ServerError> {
        let mut registry = self.inner.registry.lock();
        if registry.state != ServerState::Open {
            return Err(ServerError::Closed);
        }

        let id = ListenerId(registry.next_id);
        registry.next_id += 1;

        let listener = Arc::new(TrackedListener {
            id,
            protocol: acceptor.protocol(),
            local_addr: acceptor.local_addr().ok(),
            stop: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        registry.listeners.insert(id, Arc::clone(&listener));
        Ok(listener)
    }

    fn deregister(&self, listener: &TrackedListener) {
        self.inner.registry.lock().listeners.remove(&listener.id);
    }
}

fn bind_error(addr: &str, error: std::io::Error) -> ServerError {
    ServerError::Bind {
        addr: addr.to_string(),
        error: Arc::new(error),
    }
}
