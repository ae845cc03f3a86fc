//! Stream-shaped halves over a connected UDP socket.
//!
//! Each `poll_read` receives exactly one datagram (truncated to the
//! caller's buffer) and each `poll_write` sends its whole buffer as one
//! datagram. Both halves share the socket; no locking is involved.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;

/// Read half of a connected UDP socket.
#[derive(Debug, Clone)]
pub struct DatagramReader {
    socket: Arc<UdpSocket>,
}

/// Write half of a connected UDP socket.
#[derive(Debug, Clone)]
pub struct DatagramWriter {
    socket: Arc<UdpSocket>,
}

/// Split a connected socket into read and write halves.
pub fn split(socket: UdpSocket) -> (DatagramReader, DatagramWriter) {
    let socket = Arc::new(socket);
    (
        DatagramReader {
            socket: Arc::clone(&socket),
        },
        DatagramWriter { socket },
    )
}

impl AsyncRead for DatagramReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for DatagramWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
