//! Packing and unpacking of SCP packets.
//!
//! The dialect is a fixed little-endian byte layout, so the codec works
//! directly on byte buffers instead of going through a serializer. All
//! functions are allocation-free apart from the caller-supplied output
//! buffer, and none of them validate more than length sufficiency.

use crate::constants::{
    CPU_MASK, FLAG_REPLY_EXPECTED, FRAME_PADDING, HEADER_BASE, MAX_ARGS, SDP_TAG, SRCE_ADDR,
    SRCE_PORT_CPU,
};

/// Header fields of an outbound request packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub dest_addr: u16,
    pub dest_cpu: u8,
    pub cmd_rc: u16,
    pub seq: u16,
    pub n_args: u8,
    pub args: [u32; 3],
}

/// Decoded view of an inbound response packet. The payload borrows the
/// receive buffer; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    pub cmd_rc: u16,
    pub seq: u16,
    pub n_args: u8,
    pub args: [u32; 3],
    pub payload: &'a [u8],
}

/// Transfer unit of a bulk read or write packet, chosen per fragment from
/// the alignment of its target address and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RwUnit {
    Byte = 0,
    Short = 1,
    Word = 2,
}

impl RwUnit {
    pub fn bytes(self) -> usize {
        match self {
            RwUnit::Byte => 1,
            RwUnit::Short => 2,
            RwUnit::Word => 4,
        }
    }
}

impl TryFrom<u8> for RwUnit {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RwUnit::Byte),
            1 => Ok(RwUnit::Short),
            2 => Ok(RwUnit::Word),
            other => Err(other),
        }
    }
}

/// Picks the widest transfer unit both `address` and `length` are aligned to.
pub fn rw_unit(address: u32, length: u32) -> RwUnit {
    if address % 4 == 0 && length % 4 == 0 {
        RwUnit::Word
    } else if address % 2 == 0 && length % 2 == 0 {
        RwUnit::Short
    } else {
        RwUnit::Byte
    }
}

/// Shortest packet the codec will accept: the optional framing prefix plus
/// a header with no arguments.
pub fn min_packet_len(framed: bool) -> usize {
    padding(framed) + HEADER_BASE
}

/// Longest packet the codec will produce for a given data field limit.
pub fn max_packet_len(framed: bool, data_limit: usize) -> usize {
    padding(framed) + HEADER_BASE + 4 * MAX_ARGS + data_limit
}

fn padding(framed: bool) -> usize {
    if framed { FRAME_PADDING } else { 0 }
}

/// Packs a request into `out`, replacing its previous contents.
///
/// At most `data_limit` bytes of `payload` are written; anything beyond
/// that is dropped without error. Returns the number of bytes written.
pub fn pack(
    out: &mut Vec<u8>,
    framed: bool,
    header: &Header,
    payload: &[u8],
    data_limit: usize,
) -> usize {
    let n_args = (header.n_args as usize).min(MAX_ARGS);
    let data_len = payload.len().min(data_limit);

    out.clear();
    if framed {
        out.extend_from_slice(&[0u8; FRAME_PADDING]);
    }
    out.push(FLAG_REPLY_EXPECTED);
    out.push(SDP_TAG);
    out.push(header.dest_cpu & CPU_MASK);
    out.push(SRCE_PORT_CPU);
    out.extend_from_slice(&header.dest_addr.to_le_bytes());
    out.extend_from_slice(&SRCE_ADDR.to_le_bytes());
    out.extend_from_slice(&header.cmd_rc.to_le_bytes());
    out.extend_from_slice(&header.seq.to_le_bytes());
    for arg in &header.args[..n_args] {
        out.extend_from_slice(&arg.to_le_bytes());
    }
    out.extend_from_slice(&payload[..data_len]);
    out.len()
}

/// Reads just the sequence number out of a packet. Header-only; the rest of
/// the buffer is not touched.
pub fn unpack_seq(buf: &[u8], framed: bool) -> Option<u16> {
    if buf.len() < min_packet_len(framed) {
        return None;
    }
    let off = padding(framed) + 10;
    Some(u16::from_le_bytes([buf[off], buf[off + 1]]))
}

/// Decodes a response, expecting up to `max_args` argument fields.
///
/// The argument count is clamped down to what the buffer length permits;
/// header space not consumed by arguments is treated as payload, mirroring
/// `pack`.
pub fn unpack(buf: &[u8], framed: bool, max_args: u8) -> Option<Response<'_>> {
    if buf.len() < min_packet_len(framed) {
        return None;
    }
    let base = padding(framed);
    let body = &buf[base..];

    let cmd_rc = u16::from_le_bytes([body[8], body[9]]);
    let seq = u16::from_le_bytes([body[10], body[11]]);

    let avail = (body.len() - HEADER_BASE) / 4;
    let n_args = (max_args as usize).min(MAX_ARGS).min(avail);

    let mut args = [0u32; 3];
    for (i, arg) in args.iter_mut().enumerate().take(n_args) {
        let off = HEADER_BASE + 4 * i;
        *arg = u32::from_le_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]]);
    }

    Some(Response {
        cmd_rc,
        seq,
        n_args: n_args as u8,
        args,
        payload: &body[HEADER_BASE + 4 * n_args..],
    })
}
