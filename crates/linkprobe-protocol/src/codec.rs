//! Binary encoding/decoding for probe messages.
//!
//! This module converts between:
//! - binary frames (see [`crate::wire_types`] for the layout)
//! - high-level `linkprobe_core::Message`
//!
//! Encoding produces one complete frame so the caller can hand it to the
//! transport in a single write (one datagram on UDP). Decoding is driven
//! through a [`PacketReader`] and reads exact byte counts: tag, fixed
//! field, then payload. It never yields a partially parsed message; a
//! short or closed source surfaces as the reader's own error.
//!
//! There is no resynchronization. An unknown tag is consumed and
//! reported, and the caller is expected to drop the connection.

use std::fmt;

use linkprobe_core::{Message, Probe};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::packet_reader::{PacketReader, ReadError};
use crate::wire_types::{probe_frame_len, WireTag, MAX_PAYLOAD_LEN, PROBE_FIXED_LEN, TAG_LEN};

/// Errors that can arise when encoding/decoding a frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Probe payload does not fit the 16-bit length field.
    #[error("probe data is too long: {0} bytes (max {max})", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),

    /// Unknown message tag.
    #[error("unsupported message type {}", TagDisplay(.0))]
    UnsupportedMessage([u8; TAG_LEN]),

    /// Probe payload is not valid UTF-8 text.
    #[error("probe data is not valid UTF-8")]
    InvalidPayload,

    #[error(transparent)]
    Read(#[from] ReadError),
}

impl CodecError {
    /// Whether the failure came from the source rather than the frame contents.
    pub fn is_transport(&self) -> bool {
        matches!(self, CodecError::Read(_))
    }
}

struct TagDisplay<'a>(&'a [u8; TAG_LEN]);

impl fmt::Display for TagDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.0))
    }
}

// ============================================================================
// ENCODE
// ============================================================================

/// Encode a single message into a binary frame.
///
/// The encoded bytes are appended to `out`. Nothing is appended on error.
pub fn encode(msg: &Message, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match msg {
        Message::Probe(p) => encode_probe(p, out),
    }
}

/// Encode a single message into a freshly allocated frame.
pub fn encode_to_vec(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode(msg, &mut out)?;
    Ok(out)
}

fn encode_probe(p: &Probe, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let data = p.data.as_bytes();
    let len = u16::try_from(data.len()).map_err(|_| CodecError::PayloadTooLarge(data.len()))?;

    out.reserve(probe_frame_len(data.len()));
    out.extend_from_slice(WireTag::Probe.as_bytes());
    out.extend_from_slice(&p.id.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);

    Ok(())
}

// ============================================================================
// DECODE
// ============================================================================

/// Decode a single message off the reader.
pub async fn decode<R>(reader: &mut PacketReader<R>) -> Result<Message, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; TAG_LEN];
    reader.read_exact(&mut tag).await?;

    match WireTag::from_bytes(&tag) {
        Some(WireTag::Probe) => decode_probe(reader).await.map(Message::Probe),
        None => Err(CodecError::UnsupportedMessage(tag)),
    }
}

async fn decode_probe<R>(reader: &mut PacketReader<R>) -> Result<Probe, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut fixed = [0u8; PROBE_FIXED_LEN];
    reader.read_exact(&mut fixed).await?;

    let id = read_u64_be(&fixed[0..8]);
    let len = read_u16_be(&fixed[8..10]) as usize;

    // The 16-bit length is trusted as-is; it already caps the allocation.
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let data = String::from_utf8(data).map_err(|_| CodecError::InvalidPayload)?;

    Ok(Probe { id, data })
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}
