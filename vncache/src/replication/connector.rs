//! Outbound negotiated connections.
//!
//! Implements the caller side of the two-step handshake for both trust
//! classes: replication workers connect as peers (attaching their signed
//! advertisement), applications connect as plain clients. The result is a
//! running [`FbmClient`] with limits agreed with the server.

use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;
use url::Url;
use vncache_core::discovery::NodeAdvertisement;
use vncache_fbm::client::FbmClient;
use vncache_fbm::frame::FrameLimits;
use vncache_fbm::{FbmError, SUBPROTOCOL};

use crate::auth::claims::{AdvertisementClaims, ChallengeClaims, SessionClaims};
use crate::auth::keystore::{decode_unverified, Keystore};
use crate::auth::{random_challenge, unix_now, AuthError};

/// Connection failures surfaced to workers and applications.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server refused our credentials (HTTP 401/403).
    #[error("Not authorized by remote node")]
    Unauthorized,

    /// The server's admission limit is reached (HTTP 503).
    #[error("Remote node is at its connection limit")]
    Busy,

    /// Any other HTTP failure.
    #[error("Unexpected HTTP status {0}")]
    Http(u16),

    /// The server broke the handshake contract (bad challenge echo,
    /// unparsable endpoint).
    #[error("Handshake protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fbm(#[from] FbmError),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Reusable factory for negotiated connections under one identity.
pub struct CacheConnector {
    keystore: Arc<Keystore>,
    node_id: Option<String>,
    advertisement: Option<NodeAdvertisement>,
    http: reqwest::Client,
    suggested_recv: usize,
    suggested_header: usize,
    suggested_max_message: usize,
}

impl CacheConnector {
    /// Connector for an end-user client key.
    #[must_use]
    pub fn client(keystore: Arc<Keystore>) -> Self {
        Self {
            keystore,
            node_id: None,
            advertisement: None,
            http: reqwest::Client::new(),
            suggested_recv: 64 * 1024,
            suggested_header: 8 * 1024,
            suggested_max_message: 1 << 20,
        }
    }

    /// Connector for a cache-node key; the advertisement is attached to
    /// every upgrade so the remote side can re-broadcast it.
    #[must_use]
    pub fn peer(keystore: Arc<Keystore>, advertisement: NodeAdvertisement) -> Self {
        let mut connector = Self::client(keystore);
        connector.node_id = Some(advertisement.iss.clone());
        connector.advertisement = Some(advertisement);
        connector
    }

    /// Override the buffer sizes suggested during negotiation.
    #[must_use]
    pub fn with_buffer_suggestions(
        mut self,
        recv_buf: usize,
        header_buf: usize,
        max_message: usize,
    ) -> Self {
        self.suggested_recv = recv_buf;
        self.suggested_header = header_buf;
        self.suggested_max_message = max_message;
        self
    }

    /// Run the full two-step handshake against `connect_url` and start a
    /// client on the upgraded socket.
    pub async fn connect(&self, connect_url: &str) -> Result<Arc<FbmClient>, ConnectError> {
        // Step 1: challenge in, session token out.
        let challenge = random_challenge();
        let challenge_token = self.keystore.sign_claims(&ChallengeClaims {
            chl: challenge.clone(),
            iat: unix_now(),
            sub: self.node_id.clone(),
        })?;

        let response = self
            .http
            .get(connect_url)
            .header(reqwest::header::AUTHORIZATION, challenge_token)
            .send()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(ConnectError::Unauthorized),
            503 => return Err(ConnectError::Busy),
            other => return Err(ConnectError::Http(other)),
        }
        let session_token = response
            .text()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        // The payload is addressed to us; check the challenge echo and read
        // the server's ceilings. The server verifies its own signature.
        let session: SessionClaims = decode_unverified(&session_token)?;
        if session.chl != challenge {
            return Err(ConnectError::Protocol("challenge echo mismatch".into()));
        }

        let recv_buf = self.suggested_recv.min(session.max_recv_buffer);
        let header_buf = self.suggested_header.min(session.max_header_buffer);
        let max_message = self.suggested_max_message.min(session.max_message);

        // Step 2: upgrade with the untouched token, our signature over it,
        // and the advertisement for peer identities.
        let uri = upgrade_uri(connect_url, recv_buf, header_buf, max_message)?;
        let signature = self.keystore.sign_detached(session_token.as_bytes());
        let mut request = ClientRequestBuilder::new(uri)
            .with_header("Authorization", session_token)
            .with_header("X-Upgrade-Sig", signature)
            .with_sub_protocol(SUBPROTOCOL);
        if let Some(ad) = &self.advertisement {
            let ad_token = self.keystore.sign_claims(&AdvertisementClaims {
                ad: ad.clone(),
                iat: unix_now(),
            })?;
            request = request.with_header("X-Node-Discovery", ad_token);
        }

        let (stream, _response) = connect_async(request).await.map_err(map_ws_error)?;
        debug!(url = connect_url, "cache connection negotiated");

        Ok(FbmClient::start(
            stream,
            FrameLimits {
                max_header: header_buf,
                max_message,
            },
        ))
    }
}

/// Rewrite the connect URL for the upgrade: ws scheme plus the suggested
/// buffer sizes as query arguments.
fn upgrade_uri(
    connect_url: &str,
    recv_buf: usize,
    header_buf: usize,
    max_message: usize,
) -> Result<Uri, ConnectError> {
    let mut url = Url::parse(connect_url)
        .map_err(|e| ConnectError::Protocol(format!("bad connect url: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectError::Protocol(format!(
                "unsupported scheme: {other}"
            )))
        }
    };
    let _ = url.set_scheme(scheme);
    url.query_pairs_mut()
        .append_pair("recv_buf", &recv_buf.to_string())
        .append_pair("header_buf", &header_buf.to_string())
        .append_pair("max_mess", &max_message.to_string());
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| ConnectError::Protocol(format!("bad upgrade uri: {e}")))
}

fn map_ws_error(err: WsError) -> ConnectError {
    match err {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => ConnectError::Unauthorized,
            503 => ConnectError::Busy,
            other => ConnectError::Http(other),
        },
        other => ConnectError::Transport(other.to_string()),
    }
}
