//! Handshake validation.
//!
//! Step 1 issues the session token; step 2 validates the upgrade. Both are
//! pure functions over the request material so they are testable without a
//! socket. Validation order mirrors the handshake: prove we issued the
//! token, bind it to this instance/time/address, then prove the caller
//! holds the step-1 key.

use std::net::IpAddr;

use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::debug;
use vncache_core::config::CacheConfig;
use vncache_core::discovery::NodeAdvertisement;
use vncache_fbm::frame::FrameLimits;

use super::claims::{AdvertisementClaims, ChallengeClaims, SessionClaims};
use super::keystore::Keystore;
use super::{
    random_challenge, unix_now, AuthError, TrustClass, MAX_CLOCK_SKEW_SECS,
    NODE_DISCOVERY_HEADER, TOKEN_TTL_SECS, UPGRADE_SIG_HEADER,
};

/// Client-suggested buffer sizes, passed as upgrade query arguments.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NegotiationArgs {
    pub recv_buf: Option<usize>,
    pub header_buf: Option<usize>,
    pub max_mess: Option<usize>,
}

/// Everything the listener needs to know about an accepted session.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    /// Peer node id, present for peer sessions that supplied `sub`.
    pub node_id: Option<String>,
    pub is_peer: bool,
    /// Verified advertisement, present for peer sessions.
    pub advertisement: Option<NodeAdvertisement>,
    /// Clamped frame limits for this connection.
    pub limits: FrameLimits,
    /// Clamped receive buffer size.
    pub recv_buffer: usize,
}

/// Step 1: verify the caller's challenge token and issue the session token.
pub fn issue_session_token(
    config: &CacheConfig,
    keystore: &Keystore,
    instance_id: &str,
    authorization: &str,
    remote_ip: IpAddr,
) -> Result<String, AuthError> {
    let token = strip_bearer(authorization);
    let (challenge, class) = keystore.verify_inbound::<ChallengeClaims>(token)?;

    let now = unix_now();
    let session = SessionClaims {
        aud: instance_id.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
        nonce: random_challenge(),
        chl: challenge.chl,
        is_peer: class == TrustClass::CacheNode,
        sub: challenge.sub,
        ip: remote_ip.to_string(),
        max_recv_buffer: config.buffer_recv_max,
        max_header_buffer: config.buffer_header_max,
        max_message: config.max_message_size,
    };
    keystore.sign_claims(&session)
}

/// Step 2: validate the upgrade request against a session token this
/// server issued.
pub fn validate_upgrade(
    config: &CacheConfig,
    keystore: &Keystore,
    instance_id: &str,
    headers: &HeaderMap,
    args: &NegotiationArgs,
    remote_ip: IpAddr,
) -> Result<NegotiatedSession, AuthError> {
    let token = header_str(headers, "authorization")
        .ok_or(AuthError::MissingHeader("authorization"))?;
    let token = strip_bearer(token);

    // 1. Must be a token this server issued.
    let claims: SessionClaims = keystore.verify_own(token)?;

    // 2. Bound to this instance, unexpired, same caller address.
    if claims.aud != instance_id {
        return Err(AuthError::AudienceMismatch);
    }
    if claims.exp <= unix_now() {
        return Err(AuthError::Expired);
    }
    if config.verify_ip && claims.ip != remote_ip.to_string() {
        debug!(expected = %claims.ip, got = %remote_ip, "upgrade address mismatch");
        return Err(AuthError::AddressMismatch);
    }

    // 3. The caller proves it controls the step-1 key by signing the whole
    //    session token.
    let signature = header_str(headers, UPGRADE_SIG_HEADER)
        .ok_or(AuthError::MissingHeader("x-upgrade-sig"))?;
    let class = if claims.is_peer {
        TrustClass::CacheNode
    } else {
        TrustClass::Client
    };
    keystore.verify_detached(class, token.as_bytes(), signature)?;

    // 4. Peers attach a re-broadcastable self-signed advertisement.
    let advertisement = if claims.is_peer {
        let ad_token = header_str(headers, NODE_DISCOVERY_HEADER)
            .ok_or(AuthError::MissingHeader("x-node-discovery"))?;
        let ad: AdvertisementClaims = keystore.verify_node(ad_token)?;
        Some(ad.ad)
    } else {
        None
    };

    // 5. Clamp the client-suggested sizes into the configured ranges.
    let recv_buffer = config.clamp_recv_buffer(args.recv_buf.unwrap_or(config.buffer_recv_max));
    let max_header =
        config.clamp_header_buffer(args.header_buf.unwrap_or(config.buffer_header_max));
    let max_message = config.clamp_max_message(args.max_mess.unwrap_or(config.max_message_size));

    Ok(NegotiatedSession {
        node_id: claims.sub,
        is_peer: claims.is_peer,
        advertisement,
        limits: FrameLimits {
            max_header,
            max_message,
        },
        recv_buffer,
    })
}

/// Validate an `Authorization` token on the discovery endpoint: either key
/// class, with the 10-second issue-time skew bound.
pub fn validate_control_token(
    keystore: &Keystore,
    authorization: &str,
) -> Result<(ChallengeClaims, TrustClass), AuthError> {
    let token = strip_bearer(authorization);
    let (claims, class) = keystore.verify_inbound::<ChallengeClaims>(token)?;
    let now = unix_now();
    if claims.iat.abs_diff(now) > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::StaleToken);
    }
    Ok((claims, class))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_bearer(value: &str) -> &str {
    value
        .strip_prefix("Bearer ")
        .unwrap_or(value)
        .trim()
}
