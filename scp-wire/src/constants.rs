//! Fundamental constants of the SCP datagram dialect.

// --- Header layout ---

/// Flags byte of every outbound packet (reply expected).
pub const FLAG_REPLY_EXPECTED: u8 = 0x87;

/// Tag byte of every outbound packet.
pub const SDP_TAG: u8 = 0xFF;

/// Mask selecting the CPU number within the dest_port_cpu byte; the port
/// number occupies the high three bits and is always zero here.
pub const CPU_MASK: u8 = 0x1F;

/// Source port/cpu byte of every outbound packet.
pub const SRCE_PORT_CPU: u8 = 0xFF;

/// Source address of every outbound packet.
pub const SRCE_ADDR: u16 = 0;

/// Fixed header bytes before the argument fields:
/// flags, tag, dest_port_cpu, srce_port_cpu, dest_addr, srce_addr,
/// cmd_rc, seq_num.
pub const HEADER_BASE: usize = 12;

/// Maximum number of 32-bit argument fields in a packet.
pub const MAX_ARGS: usize = 3;

/// Length of the optional all-zero framing prefix some remotes require.
pub const FRAME_PADDING: usize = 2;

// --- Command and return codes used by the bulk engine ---

/// Command code for a bulk memory read.
pub const CMD_READ: u16 = 2;

/// Command code for a bulk memory write.
pub const CMD_WRITE: u16 = 3;

/// Return code signalling success.
pub const RC_OK: u16 = 0x80;

// --- Default connection parameters ---

/// Default maximum SCP data field length in bytes (D).
pub const DEFAULT_DATA_LENGTH: usize = 256;

/// Default per-attempt response timeout in milliseconds (T).
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Default number of transmission attempts before giving up (A).
pub const DEFAULT_N_TRIES: u8 = 5;

/// Default number of outstanding packets per connection (N).
///
/// Small enough that the linear slot scans on every response stay cheap,
/// large enough to keep a typical remote's pipeline full.
pub const DEFAULT_WINDOW: usize = 8;
