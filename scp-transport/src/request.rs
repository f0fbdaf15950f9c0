use scp_wire::RwUnit;

/// Identifier returned by every submission and carried by the request's
/// terminal [`ConnectionEvent`](crate::ConnectionEvent). For bulk transfers
/// it also serves as the bulk-id shared by all fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single arbitrary SCP command, submitted via
/// [`Connection::send_command`](crate::Connection::send_command).
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub dest_addr: u16,
    pub dest_cpu: u8,
    pub cmd: u16,
    /// Number of argument fields to send (0..=3).
    pub n_args_send: u8,
    /// Number of argument fields expected in the response (0..=3).
    pub n_args_recv: u8,
    pub args: [u32; 3],
    /// Outgoing payload. Anything beyond the connection's data field length
    /// is silently dropped at pack time.
    pub payload: Vec<u8>,
    /// Upper bound on the response payload handed back in the completion
    /// event; the data field length caps it as well.
    pub resp_capacity: usize,
}

/// Direction of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A bulk read or write being fragmented into slot-sized packets.
///
/// The `(address, offset)` cursors advance as fragments are issued; the
/// buffer itself is untouched until completion hands it back (reads fill it
/// in place as responses arrive, keyed by each fragment's recorded offset).
#[derive(Debug)]
pub(crate) struct Transfer {
    pub id: RequestId,
    pub dir: Direction,
    pub dest_addr: u16,
    pub dest_cpu: u8,
    /// Current remote target address.
    pub address: u32,
    /// Current position within `buffer`.
    pub offset: usize,
    /// Write source or read destination, returned to the caller intact.
    pub buffer: Vec<u8>,
}

/// One slot-sized slice of a transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fragment {
    pub address: u32,
    pub offset: usize,
    pub len: usize,
    pub unit: RwUnit,
    /// True when this fragment exhausts the transfer.
    pub last: bool,
}

impl Transfer {
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Slices the next fragment off the front of the cursor and advances it.
    /// Must not be called once `remaining()` is zero.
    pub fn next_fragment(&mut self, data_limit: usize) -> Fragment {
        debug_assert!(self.remaining() > 0);
        let len = self.remaining().min(data_limit);
        let fragment = Fragment {
            address: self.address,
            offset: self.offset,
            len,
            unit: scp_wire::rw_unit(self.address, len as u32),
            last: self.remaining() == len,
        };
        self.address = self.address.wrapping_add(len as u32);
        self.offset += len;
        fragment
    }
}

/// A queue entry: either a single command or the unissued part of a bulk
/// transfer. Transfers stay at the queue head until their final fragment
/// has been bound to a slot.
#[derive(Debug)]
pub(crate) enum Request {
    Single {
        id: RequestId,
        command: CommandRequest,
    },
    Transfer(Transfer),
}
