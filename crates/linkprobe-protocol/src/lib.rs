//! linkprobe-protocol
//!
//! Wire-level encoding/decoding for probe messages.
//!
//! This crate is responsible for turning logical messages
//! (`linkprobe_core::Message`) into bytes and back again.
//!
//! - [`codec`]         : binary frame encode / decode
//! - [`packet_reader`] : buffering that never straddles two source reads,
//!   so one decode stays inside one datagram
//! - [`wire_types`]    : tags and field sizes

pub mod wire_types;
pub mod packet_reader;
pub mod codec;

pub use codec::{decode, encode, encode_to_vec, CodecError};
pub use packet_reader::{PacketReader, ReadError};
