//! Client-side dialing.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;

use crate::datagram;
use crate::protocol::Protocol;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established transport connection, split into independent halves.
///
/// Dropping both halves closes the connection.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,

    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W, peer: Option<SocketAddr>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Dials an address and returns a connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<Connection>;
}

/// Connector for the given protocol.
pub fn connector_for(protocol: Protocol) -> Box<dyn Connector> {
    match protocol {
        Protocol::Tcp => Box::new(TcpConnector),
        Protocol::Udp => Box::new(UdpConnector),
    }
}

/// Dials TCP streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, addr: &str) -> io::Result<Connection> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();

        debug!(addr, ?peer, "TCP connection established");

        let (reader, writer) = stream.into_split();
        Ok(Connection::new(reader, writer, peer))
    }
}

/// Dials connected UDP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    async fn dial(&self, addr: &str) -> io::Result<Connection> {
        let peer = lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("could not resolve {}", addr))
        })?;

        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;

        debug!(addr, %peer, local = ?socket.local_addr().ok(), "UDP socket connected");

        let (reader, writer) = datagram::split(socket);
        Ok(Connection::new(reader, writer, Some(peer)))
    }
}
