//! FBM, the framed binary message protocol.
//!
//! One WebSocket carries concurrent request/response pairs, matched by a
//! 32-bit message id. Every WebSocket binary message is one frame:
//!
//! ```text
//! +----------------+------------------------+------------------+
//! | 4B BE message  | header block           | body (remaining  |
//! | id (> 0)       | (cmd, value, 0xFF)*    | bytes, opaque)   |
//! |                | terminated by lone 0xFF|                  |
//! +----------------+------------------------+------------------+
//! ```
//!
//! Command bytes and status tokens are bit-exact interop requirements; see
//! [`header`]. The WebSocket sub-protocol name is [`SUBPROTOCOL`].
//!
//! Layering:
//! - [`header`]: the command/value triple codec and the `Action`/`Status`
//!   token tables
//! - [`frame`]: whole-message encode/decode with negotiated size limits
//! - [`client`]: multiplexing client over a tokio-tungstenite stream

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod frame;
pub mod header;

mod error;
pub use error::{FbmError, Result};

/// WebSocket sub-protocol announced by both sides of a cache connection.
pub const SUBPROTOCOL: &str = "object-cache";

/// Default keep-alive ping period.
pub const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub mod prelude {
    pub use crate::client::FbmClient;
    pub use crate::frame::{FrameLimits, Request, Response};
    pub use crate::header::{Action, Status};
    pub use crate::{FbmError, Result, SUBPROTOCOL};
}
