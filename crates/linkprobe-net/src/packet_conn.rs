//! Server-side packet connections.
//!
//! [`PacketConn`] is the shape the echo handler works against: receive a
//! packet along with its sender, send a packet to an address. UDP sockets
//! provide this natively; [`StreamPacketConn`] adapts a TCP stream by
//! always reporting the stream's peer as the sender and ignoring the
//! target on send.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::protocol::Protocol;

#[async_trait]
pub trait PacketConn: Send {
    /// Receive one packet. Stream end-of-input is reported as
    /// [`io::ErrorKind::UnexpectedEof`].
    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn protocol(&self) -> Protocol;
}

/// A TCP stream acting like an unbound packet connection.
#[derive(Debug)]
pub struct StreamPacketConn {
    stream: TcpStream,
    peer: SocketAddr,
}

impl StreamPacketConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        StreamPacketConn { stream, peer }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl PacketConn for StreamPacketConn {
    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let n = self.stream.read(buf).await?;
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the stream"));
        }
        Ok((n, self.peer))
    }

    async fn send_to(&mut self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        self.stream.write_all(buf).await?;
        Ok(buf.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}

/// An unconnected UDP socket shared by every peer that sends to it.
#[derive(Debug)]
pub struct DatagramPacketConn {
    socket: UdpSocket,
}

impl DatagramPacketConn {
    pub fn new(socket: UdpSocket) -> Self {
        DatagramPacketConn { socket }
    }
}

#[async_trait]
impl PacketConn for DatagramPacketConn {
    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}
