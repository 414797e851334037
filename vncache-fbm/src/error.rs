use std::time::Duration;

use thiserror::Error;

/// FBM protocol errors
#[derive(Debug, Error)]
pub enum FbmError {
    /// Frame ended before the header block terminator
    #[error("Truncated frame")]
    Truncated,

    /// Header command byte outside the recognized table
    #[error("Unknown header command: {0:#04x}")]
    UnknownCommand(u8),

    /// Header value is not valid UTF-8
    #[error("Header value is not UTF-8")]
    BadValue,

    /// Status or action token outside the recognized tables
    #[error("Unknown token: {0:?}")]
    UnknownToken(String),

    /// Message id 0 is reserved for out-of-band control
    #[error("Message id 0 is reserved")]
    IdReserved,

    /// Frame exceeds the negotiated per-connection maximum
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Header block exceeds the negotiated header buffer
    #[error("Header block too large: {size} bytes (max: {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// The request was refused by the remote side (`err` status)
    #[error("Request rejected by remote")]
    Rejected,

    /// No response arrived within the deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying WebSocket failed or closed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// WebSocket transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for FBM operations
pub type Result<T> = std::result::Result<T, FbmError>;

impl FbmError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }

    /// True when the owning connection is unusable after this error.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::Transport(_))
    }
}
