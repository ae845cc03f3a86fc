//! linkprobe-net
//!
//! Transport collaborators for the probe client and echo server.
//!
//! Client side, a [`Connector`] dials an address and hands back a
//! [`Connection`]: independent read and write halves. On UDP every read
//! returns one datagram and every write sends one.
//!
//! Server side, an [`Acceptor`] yields [`PacketConn`]s. A TCP stream is
//! wrapped so it looks like an unbound packet connection, which lets a
//! single handler serve both transports.

mod acceptor;
mod connector;
mod datagram;
mod packet_conn;
mod protocol;

pub use acceptor::{Acceptor, DatagramAcceptor, TcpAcceptor};
pub use connector::{connector_for, BoxedReader, BoxedWriter, Connection, Connector, TcpConnector, UdpConnector};
pub use datagram::{DatagramReader, DatagramWriter};
pub use packet_conn::{DatagramPacketConn, PacketConn, StreamPacketConn};
pub use protocol::{ParseProtocolError, Protocol};
