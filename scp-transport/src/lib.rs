//! # SCP Transport
//!
//! A reliable request/response transport engine for the SCP dialect layered
//! on unreliable UDP datagrams.
//!
//! One [`Connection`] addresses a single remote endpoint and multiplexes
//! many outstanding requests over a fixed window of slots. Clients submit
//! single commands or bulk reads/writes of arbitrary byte ranges; bulk
//! requests are transparently fragmented into slot-sized packets and
//! reassembled. Each packet is matched to its response by sequence number
//! and retransmitted on a per-attempt timeout until a configured attempt
//! budget is exhausted.
//!
//! ## Architecture
//!
//! - **Sans-IO**: the engine owns no socket and no timers. A driver pumps
//!   [`Connection::poll_transmit`] / [`Connection::handle_datagram`] /
//!   [`Connection::handle_timeout`] and sleeps until
//!   [`Connection::next_wakeup`].
//! - **Completion events**: every request receives exactly one terminal
//!   [`ConnectionEvent`], drained via [`Connection::poll_event`].
//! - **Bounded memory**: the slot table is allocated once; the request
//!   queue grows in doubling blocks and never shrinks.

pub mod connection;
pub mod error;
pub mod flat_map;
pub mod queue;
pub mod request;
mod slot;
pub mod time;

/// Terminal notification for a submitted request, or the final teardown
/// notification. Each request produces exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A single command received its response. `payload` is truncated to the
    /// request's response capacity and the connection's data field length.
    SingleCompleted {
        id: RequestId,
        cmd_rc: u16,
        n_args: u8,
        args: [u32; 3],
        payload: Vec<u8>,
    },
    /// A single command failed (timeout, transport error, or teardown).
    SingleFailed { id: RequestId, error: ScpError },
    /// A bulk read or write finished; `buffer` is the caller's buffer,
    /// filled in for reads.
    TransferCompleted { id: RequestId, buffer: Vec<u8> },
    /// A bulk read or write was cancelled; the offending return code rides
    /// inside [`ScpError::BadReturnCode`] when the remote rejected a
    /// fragment. The caller's buffer is handed back as-is.
    TransferFailed {
        id: RequestId,
        error: ScpError,
        buffer: Vec<u8>,
    },
    /// Teardown finished. Emitted exactly once per connection.
    Closed,
}

pub use connection::{Config, Connection, SendToken, Transmit};
pub use error::ScpError;
pub use queue::BlockQueue;
pub use request::{CommandRequest, Direction, RequestId};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
