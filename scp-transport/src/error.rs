use thiserror::Error;

/// Errors surfaced to clients of an SCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScpError {
    /// A bulk read or write received a response with a non-OK return code.
    /// The offending code is attached.
    #[error("remote returned failure code {rc:#06x}")]
    BadReturnCode { rc: u16 },
    /// All transmission attempts elapsed without a matching response.
    #[error("request timed out")]
    Timeout,
    /// The connection was torn down while the request was pending, or a
    /// submission arrived after teardown began.
    #[error("connection closed")]
    Closed,
    /// The I/O substrate reported a send failure; `code` is its native
    /// (negative) error code, passed through unchanged.
    #[error("transport error {code}")]
    Transport { code: i32 },
    /// Connection parameters were rejected at construction time.
    #[error("invalid connection configuration")]
    InvalidConfig,
}

impl ScpError {
    /// Short identifier for logs, in the style of errno names.
    pub fn name(&self) -> &'static str {
        match self {
            ScpError::BadReturnCode { .. } => "BAD_RC",
            ScpError::Timeout => "TIMEOUT",
            ScpError::Closed => "CLOSED",
            ScpError::Transport { .. } => "TRANSPORT",
            ScpError::InvalidConfig => "INVALID_CONFIG",
        }
    }

    /// Numeric code: engine-defined errors are small positive values,
    /// transport errors keep the substrate's negative code.
    pub fn code(&self) -> i32 {
        match self {
            ScpError::BadReturnCode { .. } => 1,
            ScpError::Timeout => 2,
            ScpError::Closed => 3,
            ScpError::Transport { code } => *code,
            ScpError::InvalidConfig => 4,
        }
    }
}
