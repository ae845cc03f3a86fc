//! Low-level wire types and constants.
//!
//! Frame layout (bit-exact):
//!
//! ```text
//! [0..3]   tag        ASCII, "PRB" for a probe
//! [3..11]  id         u64 BE
//! [11..13] length L   u16 BE
//! [13..]   payload    L bytes
//! ```
//!
//! The actual encode/decode logic lives in `codec`.

/// Size of the message tag that starts every frame.
pub const TAG_LEN: usize = 3;

/// Size of the fixed probe field following the tag: ID + payload length.
pub const PROBE_FIXED_LEN: usize = 8 + 2;

/// Largest payload a probe can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Tags identifying the message kind of a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireTag {
    Probe,
}

impl WireTag {
    pub const fn as_bytes(self) -> &'static [u8; TAG_LEN] {
        match self {
            WireTag::Probe => b"PRB",
        }
    }

    pub fn from_bytes(tag: &[u8; TAG_LEN]) -> Option<Self> {
        match tag {
            b"PRB" => Some(WireTag::Probe),
            _ => None,
        }
    }
}

/// Total encoded size of a probe frame carrying `payload_len` bytes.
pub const fn probe_frame_len(payload_len: usize) -> usize {
    TAG_LEN + PROBE_FIXED_LEN + payload_len
}
