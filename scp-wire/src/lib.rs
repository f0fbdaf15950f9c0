//! # SCP Wire
//!
//! Byte-level codec for the SCP request/response dialect: a fixed
//! little-endian header (addressing bytes, a 16-bit command/return code, a
//! 16-bit sequence number, up to three 32-bit arguments) followed by a
//! bounded payload, optionally preceded by a two-byte zero framing prefix.
//!
//! The transport engine lives in `scp-transport`; this crate knows nothing
//! about sockets, timers, or retries.

pub mod codec;
pub mod constants;

pub use codec::{Header, Response, RwUnit, max_packet_len, min_packet_len, pack, rw_unit, unpack, unpack_seq};
