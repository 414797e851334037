//! HTTP/WebSocket surface of a node.
//!
//! Three routes, all configurable: the connect endpoint (step-1 GET and
//! WebSocket upgrade on the same path), the authenticated discovery
//! endpoint and the unauthenticated well-known endpoint.

pub(crate) mod connect;
pub(crate) mod endpoints;
pub(crate) mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

use crate::auth::AuthError;
use crate::node::NodeState;

pub(crate) fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route(&state.config.connect_path, get(connect::connect_endpoint))
        .route(
            &state.config.discovery_path,
            get(endpoints::discovery_endpoint),
        )
        .route(
            &state.config.well_known_path,
            get(endpoints::well_known_endpoint),
        )
        .with_state(state)
}

/// Serve until the exit token fires.
pub(crate) async fn serve(state: Arc<NodeState>, listener: tokio::net::TcpListener) {
    let exit = state.exit.clone();
    let app = router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { exit.cancelled().await })
    .await;
    match result {
        Ok(()) => info!("listener stopped"),
        Err(e) => error!(error = %e, "listener failed"),
    }
}

/// HTTP status for a failed handshake step: auth failures are 401,
/// structurally broken requests are 400.
pub(crate) fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::MissingHeader(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNAUTHORIZED,
    }
}
