/// VNCache Error Types
///
/// Comprehensive error handling for all cache operations.
use std::io;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent on GET/DELETE, or rename source missing
    #[error("Key not found")]
    NotFound,

    /// Rename destination already holds an entry
    #[error("Key conflict: destination already exists")]
    Conflict,

    /// Malformed frame, unknown action or missing required header
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Signature, claim, time or address check failed
    #[error("Authentication failure: {0}")]
    Auth(String),

    /// Connection admission refused or a bounded queue overflowed
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// WebSocket abnormal close or read/write error
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Bucket invariant violation or allocator failure
    #[error("Fatal: {0}")]
    Fatal(String),

    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Channel receive error
    #[error("Channel receive error")]
    ChannelRecv,
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an authentication failure
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a transport failure
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an overload error
    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::Overloaded(msg.into())
    }

    /// True when the error stays within one request: the connection replies
    /// `err`/`nf` and keeps serving.
    #[must_use]
    pub const fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Conflict | Self::Protocol(_)
        )
    }

    /// True when the owning connection must be torn down.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Fatal(_) | Self::ChannelSend | Self::ChannelRecv => true,
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<flume::RecvError> for CacheError {
    fn from(_: flume::RecvError) -> Self {
        Self::ChannelRecv
    }
}
