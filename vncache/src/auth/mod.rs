//! Negotiation and authentication.
//!
//! Every participant holds an ECDSA P-384 key pair and speaks ES384 JWTs.
//! Connecting is a two-step handshake:
//!
//! 1. Plain GET to the connect endpoint with a caller-signed challenge
//!    token. The server answers with a short-lived session token bound to
//!    this server instance (`aud`), the caller's address (`ip`) and the
//!    negotiated buffer sizes.
//! 2. WebSocket upgrade on the same path carrying the untouched session
//!    token plus a detached signature over it (`X-Upgrade-Sig`), which
//!    proves the caller controls the step-1 key. Peers also attach their
//!    self-signed advertisement (`X-Node-Discovery`).
//!
//! Trust is split into two classes: client keys and cache-node keys. Which
//! class verified step 1 decides whether the session is a peer.

pub mod claims;
pub mod keystore;
pub mod negotiate;

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Session token lifetime.
pub const TOKEN_TTL_SECS: u64 = 30;

/// Accepted clock skew on authenticated control endpoints.
pub const MAX_CLOCK_SKEW_SECS: u64 = 10;

/// Upgrade signature header.
pub const UPGRADE_SIG_HEADER: &str = "x-upgrade-sig";

/// Peer advertisement header.
pub const NODE_DISCOVERY_HEADER: &str = "x-node-discovery";

/// Authentication failures. Never serialized into FBM frames; these map to
/// HTTP statuses at the endpoint layer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Key material rejected: {0}")]
    InvalidKey(String),

    #[error("Token rejected: {0}")]
    InvalidToken(String),

    #[error("Signature does not verify")]
    SignatureMismatch,

    #[error("Token was issued for a different server instance")]
    AudienceMismatch,

    #[error("Token expired")]
    Expired,

    #[error("Token clock skew exceeds {MAX_CLOCK_SKEW_SECS}s")]
    StaleToken,

    #[error("Connection address does not match token")]
    AddressMismatch,

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Caller is not authorized")]
    NotAuthorized,
}

impl AuthError {
    pub(crate) fn invalid_token(err: impl std::fmt::Display) -> Self {
        Self::InvalidToken(err.to_string())
    }

    pub(crate) fn invalid_key(err: impl std::fmt::Display) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

/// Which key class authenticated a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustClass {
    /// End-user client key.
    Client,
    /// Another cache node's key; sessions in this class may replicate.
    CacheNode,
}

/// Seconds since the unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Random base32 challenge (20 raw bytes, no padding).
#[must_use]
pub fn random_challenge() -> String {
    use rand::RngCore;
    let mut raw = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    data_encoding::BASE32_NOPAD.encode(&raw)
}

/// Random base32 instance/nonce value (16 raw bytes = 128 bits).
#[must_use]
pub fn random_id() -> String {
    use rand::RngCore;
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    data_encoding::BASE32_NOPAD.encode(&raw)
}
