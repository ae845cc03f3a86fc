//! Listen endpoints.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, ToSocketAddrs, UdpSocket};

use crate::packet_conn::{DatagramPacketConn, PacketConn, StreamPacketConn};
use crate::protocol::Protocol;

/// A bound listen endpoint producing packet connections.
///
/// Dropping the acceptor closes the endpoint.
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next connection. Must be cancel-safe.
    async fn accept(&mut self) -> io::Result<Box<dyn PacketConn>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn protocol(&self) -> Protocol;
}

/// One packet connection per accepted TCP stream.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Ok(TcpAcceptor {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        TcpAcceptor { listener }
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<Box<dyn PacketConn>> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(StreamPacketConn::new(stream, peer)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}

/// UDP has no connections: the bound socket itself is handed out once,
/// after which `accept` parks until the acceptor is dropped.
#[derive(Debug)]
pub struct DatagramAcceptor {
    socket: Option<UdpSocket>,
    local: SocketAddr,
}

impl DatagramAcceptor {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::from_socket(UdpSocket::bind(addr).await?)
    }

    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        let local = socket.local_addr()?;
        Ok(DatagramAcceptor {
            socket: Some(socket),
            local,
        })
    }
}

#[async_trait]
impl Acceptor for DatagramAcceptor {
    async fn accept(&mut self) -> io::Result<Box<dyn PacketConn>> {
        match self.socket.take() {
            Some(socket) => Ok(Box::new(DatagramPacketConn::new(socket))),
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}
