//! Failures that end a connection epoch.

use std::io;
use std::time::Duration;

use linkprobe_protocol::{CodecError, ReadError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dial failed: {0}")]
    Dial(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("could not encode probe: {0}")]
    Encode(CodecError),

    #[error("could not decode response: {0}")]
    Decode(CodecError),

    /// The decode task went away without reporting why.
    #[error("decoder stopped")]
    DecoderStopped,
}

impl EngineError {
    /// Dial, read, write and timeout failures.
    pub fn is_transport(&self) -> bool {
        match self {
            EngineError::Encode(_) => false,
            EngineError::Decode(e) => e.is_transport(),
            _ => true,
        }
    }

    /// Malformed frames or payloads, in either direction.
    pub fn is_protocol(&self) -> bool {
        !self.is_transport()
    }

    /// The transport reported that the peer closed or reset the connection.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            EngineError::Decode(CodecError::Read(ReadError::Io(e))) | EngineError::Write(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::BrokenPipe
                )
            }
            _ => false,
        }
    }

    /// The source kept returning no data. A stream at end of file looks
    /// the same as a datagram source delivering only empty packets.
    pub fn is_stalled(&self) -> bool {
        matches!(
            self,
            EngineError::Decode(CodecError::Read(ReadError::NoProgress))
        )
    }
}
