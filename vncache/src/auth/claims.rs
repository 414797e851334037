//! JWT claim shapes.
//!
//! Claim names are bit-exact interop requirements: `aud`, `iat`, `exp`,
//! `nonce`, `chl`, `sub`, `iss`, `isPeer`, `ip`, `peers`, `url`, `dis`.

use serde::{Deserialize, Serialize};
use vncache_core::discovery::NodeAdvertisement;

/// Step-1 payload signed by the caller: a random challenge plus the
/// caller's node id when it is a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeClaims {
    pub chl: String,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// Step-1 response: the server-signed session token authorizing one
/// WebSocket upgrade against this server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// This server instance's random 128-bit id.
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    pub nonce: String,
    /// Caller's challenge, echoed.
    pub chl: String,
    #[serde(rename = "isPeer")]
    pub is_peer: bool,
    /// Caller's node id, echoed when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Caller's observed remote address.
    pub ip: String,
    /// Server-side buffer ceilings the upgrade may negotiate under.
    #[serde(rename = "maxRecvBuffer")]
    pub max_recv_buffer: usize,
    #[serde(rename = "maxHeaderBuffer")]
    pub max_header_buffer: usize,
    #[serde(rename = "maxMessage")]
    pub max_message: usize,
}

/// A node's self-signed advertisement, re-broadcastable by whoever holds
/// it. The advertisement fields flatten to the wire shape
/// `{iss, url, dis}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementClaims {
    #[serde(flatten)]
    pub ad: NodeAdvertisement,
    pub iat: u64,
}

/// Well-known endpoint payload: bootstrap identity, no prior state needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownClaims {
    pub sub: NodeAdvertisement,
    pub chl: String,
    pub iat: u64,
}

/// Discovery endpoint payload: currently connected peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponseClaims {
    pub peers: Vec<NodeAdvertisement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub chl: String,
    pub iat: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_claim_names_are_bit_exact() {
        let claims = SessionClaims {
            aud: "instance".into(),
            iat: 1,
            exp: 31,
            nonce: "n".into(),
            chl: "c".into(),
            is_peer: true,
            sub: Some("node-b".into()),
            ip: "10.0.0.1".into(),
            max_recv_buffer: 4096,
            max_header_buffer: 1024,
            max_message: 65536,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("isPeer").is_some());
        assert!(json.get("maxRecvBuffer").is_some());
        assert!(json.get("maxHeaderBuffer").is_some());
        assert!(json.get("maxMessage").is_some());
        assert!(json.get("is_peer").is_none());
    }

    #[test]
    fn test_advertisement_claims_flatten() {
        let claims = AdvertisementClaims {
            ad: NodeAdvertisement::new("node-a", "http://a/cache")
                .with_discovery("http://a/discover"),
            iat: 7,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["iss"], "node-a");
        assert_eq!(json["url"], "http://a/cache");
        assert_eq!(json["dis"], "http://a/discover");
        assert_eq!(json["iat"], 7);
    }

    #[test]
    fn test_challenge_sub_is_optional() {
        let json = serde_json::to_string(&ChallengeClaims {
            chl: "c".into(),
            iat: 1,
            sub: None,
        })
        .unwrap();
        assert!(!json.contains("sub"));
    }
}
