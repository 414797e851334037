//! Well-known and discovery control endpoints.
//!
//! Both answer a signed JWT as plain text. The well-known endpoint needs no
//! prior state and bootstraps identity discovery; the discovery endpoint
//! requires a fresh caller-signed token and returns the currently connected
//! peers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::auth::claims::{DiscoveryResponseClaims, WellKnownClaims};
use crate::auth::negotiate::validate_control_token;
use crate::auth::{random_challenge, unix_now};
use crate::node::NodeState;
use crate::server::auth_status;

pub(crate) async fn well_known_endpoint(State(state): State<Arc<NodeState>>) -> Response {
    let claims = WellKnownClaims {
        sub: state.identity.clone(),
        chl: random_challenge(),
        iat: unix_now(),
    };
    match state.keystore.sign_claims(&claims) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => {
            debug!(error = %e, "well-known signing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) async fn discovery_endpoint(
    State(state): State<Arc<NodeState>>,
    headers: HeaderMap,
) -> Response {
    let Some(authorization) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let (challenge, _class) = match validate_control_token(&state.keystore, authorization) {
        Ok(verified) => verified,
        Err(e) => {
            debug!(error = %e, "discovery caller refused");
            return auth_status(&e).into_response();
        }
    };

    let claims = DiscoveryResponseClaims {
        peers: state.monitor.snapshot(),
        sub: challenge.sub,
        chl: challenge.chl,
        iat: unix_now(),
    };
    match state.keystore.sign_claims(&claims) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => {
            debug!(error = %e, "discovery signing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
