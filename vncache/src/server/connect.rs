//! The connect endpoint: token issue and WebSocket upgrade on one path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;
use vncache_fbm::SUBPROTOCOL;

use crate::auth::negotiate::{self, NegotiationArgs};
use crate::node::NodeState;
use crate::server::{auth_status, listener};

/// A plain GET runs handshake step 1; an upgrade request runs step 2 and
/// hands the socket to the cache listener.
pub(crate) async fn connect_endpoint(
    State(state): State<Arc<NodeState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(args): Query<NegotiationArgs>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Err(_) => issue_token(&state, &headers, remote),
        Ok(ws) => accept_upgrade(state, ws, &headers, &args, remote),
    }
}

fn issue_token(state: &Arc<NodeState>, headers: &HeaderMap, remote: SocketAddr) -> Response {
    let Some(authorization) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match negotiate::issue_session_token(
        &state.config,
        &state.keystore,
        &state.instance_id,
        authorization,
        remote.ip(),
    ) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => {
            debug!(remote = %remote, error = %e, "negotiation step 1 refused");
            auth_status(&e).into_response()
        }
    }
}

fn accept_upgrade(
    state: Arc<NodeState>,
    ws: WebSocketUpgrade,
    headers: &HeaderMap,
    args: &NegotiationArgs,
    remote: SocketAddr,
) -> Response {
    let session = match negotiate::validate_upgrade(
        &state.config,
        &state.keystore,
        &state.instance_id,
        headers,
        args,
        remote.ip(),
    ) {
        Ok(session) => session,
        Err(e) => {
            debug!(remote = %remote, error = %e, "upgrade refused");
            return auth_status(&e).into_response();
        }
    };

    // Admission check happens only after the caller proved itself, so an
    // unauthenticated flood cannot learn the connection count.
    let Some(permit) = state.try_acquire_connection() else {
        debug!(remote = %remote, "connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let max_message = session.limits.max_message;
    ws.protocols([SUBPROTOCOL])
        .max_message_size(max_message)
        .max_frame_size(max_message)
        .on_upgrade(move |socket| listener::run_session(state, session, permit, socket))
        .into_response()
}
