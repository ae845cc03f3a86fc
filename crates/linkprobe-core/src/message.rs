//! Message types exchanged over a probe connection.
//!
//! These are **transport-agnostic** logical messages. The binary
//! encoder lives in the `linkprobe-protocol` crate; this module is
//! purely logical.

use std::fmt;

/// A message on the wire.
///
/// Every variant maps to one three-byte tag in the frame header, so
/// adding a message kind means adding a variant here and a tag in
/// `linkprobe_protocol::wire_types`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Timestamped request awaiting an identical echo.
    Probe(Probe),
}

/// Probe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Unique and strictly increasing within one connection epoch,
    /// starting at 1.
    pub id: u64,

    /// Free-form text payload, at most 65535 bytes once encoded.
    pub data: String,
}

impl Probe {
    pub fn new(id: u64, data: impl Into<String>) -> Self {
        Probe {
            id,
            data: data.into(),
        }
    }

    /// The probe the client sends for `id`: payload `"Hello <id>"`.
    pub fn hello(id: u64) -> Self {
        Probe::new(id, format!("Hello {}", id))
    }
}

impl From<Probe> for Message {
    fn from(p: Probe) -> Self {
        Message::Probe(p)
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.id, self.data)
    }
}
