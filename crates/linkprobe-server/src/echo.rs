//! Echo responder: every inbound packet goes back verbatim to its sender.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use linkprobe_net::PacketConn;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::types::Handler;

#[derive(Debug, Clone)]
pub struct EchoHandler {
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl EchoHandler {
    pub fn new(buffer_size: usize, read_timeout: Duration, write_timeout: Duration) -> Self {
        EchoHandler {
            buffer_size,
            read_timeout,
            write_timeout,
        }
    }
}

/// Errors after which a stream connection cannot be read again.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

#[async_trait]
impl Handler for EchoHandler {
    async fn serve(&self, mut conn: Box<dyn PacketConn>, closing: CancellationToken) {
        let protocol = conn.protocol();
        let mut buf = vec![0u8; self.buffer_size];
        // Only report a read timeout once per burst of traffic.
        let mut active = false;

        loop {
            let received = tokio::select! {
                _ = closing.cancelled() => return,
                res = timeout(self.read_timeout, conn.recv_from(&mut buf)) => res,
            };

            let (n, peer) = match received {
                Err(_) => {
                    if active {
                        warn!(%protocol, timeout = ?self.read_timeout, "Reading from connection timed out");
                        active = false;
                    }
                    continue;
                }
                Ok(Err(e)) if is_disconnect(&e) => {
                    debug!(%protocol, error = %e, "connection closed");
                    return;
                }
                Ok(Err(e)) => {
                    error!(%protocol, error = %e, "Could not read request");
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            active = true;

            debug!(%protocol, %peer, data = %String::from_utf8_lossy(&buf[..n]), "Message received");

            let written = tokio::select! {
                _ = closing.cancelled() => return,
                res = timeout(self.write_timeout, conn.send_to(&buf[..n], peer)) => res,
            };

            match written {
                Ok(Ok(wn)) if wn == n => {
                    debug!(%protocol, %peer, len = n, "Message sent");
                }
                Ok(Ok(wn)) => {
                    error!(%protocol, %peer, expected = n, actual = wn, "Unexpected write length");
                }
                Ok(Err(e)) if is_disconnect(&e) || e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(%protocol, %peer, error = %e, "connection closed");
                    return;
                }
                Ok(Err(e)) => {
                    error!(%protocol, %peer, error = %e, "Could not write response");
                }
                Err(_) => {
                    error!(%protocol, %peer, timeout = ?self.write_timeout, "Writing response timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use linkprobe_net::Protocol;

    type Packet = (Vec<u8>, SocketAddr);

    /// Replays a fixed script of reads, records writes.
    /// Parks forever once the script runs out.
    struct Scripted {
        reads: VecDeque<io::Result<Packet>>,
        writes: Arc<Mutex<Vec<Packet>>>,
        short_writes: bool,
    }

    impl Scripted {
        fn new(reads: Vec<io::Result<Packet>>) -> (Self, Arc<Mutex<Vec<Packet>>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let conn = Scripted {
                reads: reads.into(),
                writes: Arc::clone(&writes),
                short_writes: false,
            };
            (conn, writes)
        }
    }

    #[async_trait]
    impl PacketConn for Scripted {
        async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.reads.pop_front() {
                Some(Ok((data, from))) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), from))
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }

        async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            self.writes.lock().unwrap().push((buf.to_vec(), target));
            if self.short_writes {
                return Ok(buf.len() / 2);
            }
            Ok(buf.len())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(addr(8123))
        }

        fn protocol(&self) -> Protocol {
            Protocol::Udp
        }
    }

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    fn handler() -> EchoHandler {
        EchoHandler::new(64, Duration::from_secs(2), Duration::from_secs(5))
    }

    fn eof() -> io::Result<Packet> {
        Err(io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    #[tokio::test]
    async fn echoes_each_packet_to_its_sender() {
        let (conn, writes) = Scripted::new(vec![
            Ok((b"one".to_vec(), addr(1))),
            Ok((b"two".to_vec(), addr(2))),
            eof(),
        ]);

        handler().serve(Box::new(conn), CancellationToken::new()).await;

        assert_eq!(
            *writes.lock().unwrap(),
            vec![(b"one".to_vec(), addr(1)), (b"two".to_vec(), addr(2))]
        );
    }

    #[tokio::test]
    async fn keeps_reading_after_a_read_error() {
        let (conn, writes) = Scripted::new(vec![
            Err(io::Error::new(io::ErrorKind::Other, "transient")),
            Ok((b"after".to_vec(), addr(1))),
            eof(),
        ]);

        handler().serve(Box::new(conn), CancellationToken::new()).await;

        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_write_does_not_stop_the_handler() {
        let (mut conn, writes) = Scripted::new(vec![
            Ok((b"abcd".to_vec(), addr(1))),
            Ok((b"efgh".to_vec(), addr(1))),
            eof(),
        ]);
        conn.short_writes = true;

        handler().serve(Box::new(conn), CancellationToken::new()).await;

        assert_eq!(writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_survives_timeouts_until_closing() {
        let (conn, writes) = Scripted::new(vec![Ok((b"hi".to_vec(), addr(1)))]);
        let closing = CancellationToken::new();

        let task = tokio::spawn({
            let closing = closing.clone();
            async move { handler().serve(Box::new(conn), closing).await }
        });

        // Several read deadlines pass without ending the handler.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!task.is_finished());

        closing.cancel();
        task.await.unwrap();
        assert_eq!(writes.lock().unwrap().len(), 1);
    }
}
