//! Periodic peer discovery.
//!
//! Every `discovery_interval` the sweep rebuilds the known-peer collection:
//! seed with the connected peers' advertisements plus the statically
//! configured ones, then walk breadth-first through each peer's discovery
//! endpoint, unioning newly learned peers onto the end of the walk queue.
//! Self is filtered throughout; one unreachable peer is logged and skipped,
//! never aborting the sweep.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};
use vncache_core::discovery::NodeAdvertisement;

use crate::auth::claims::{ChallengeClaims, DiscoveryResponseClaims};
use crate::auth::{random_challenge, unix_now};
use crate::node::{NodeError, NodeState};

pub(crate) async fn run_discovery_loop(state: Arc<NodeState>) {
    let mut ticker = tokio::time::interval(state.config.discovery_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = state.exit.cancelled() => break,
            _ = ticker.tick() => {}
        }
        sweep(&state).await;
        state.nudge_replication();
    }
}

/// One breadth-first walk over the cluster.
pub(crate) async fn sweep(state: &Arc<NodeState>) {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(state.config.node_id.to_ascii_lowercase());

    let mut queue: VecDeque<NodeAdvertisement> = VecDeque::new();
    for ad in state
        .monitor
        .snapshot()
        .into_iter()
        .chain(state.config.known_peers.iter().cloned())
    {
        if !ad.same_node(&state.config.node_id) {
            queue.push_back(ad);
        }
    }

    let mut result = Vec::new();
    while let Some(ad) = queue.pop_front() {
        if !seen.insert(ad.iss.to_ascii_lowercase()) {
            continue;
        }
        match fetch_peers(state, &ad).await {
            Ok(peers) => {
                for peer in peers {
                    let known = seen.contains(&peer.iss.to_ascii_lowercase());
                    if !known && !peer.same_node(&state.config.node_id) {
                        queue.push_back(peer);
                    }
                }
            }
            Err(e) => {
                warn!(peer = %ad, error = %e, "discovery walk skipping peer");
            }
        }
        result.push(ad);
    }

    debug!(peers = result.len(), "discovery sweep complete");
    state.discovered.replace(result);
}

/// Ask one peer for its connected-peer list.
async fn fetch_peers(
    state: &Arc<NodeState>,
    ad: &NodeAdvertisement,
) -> Result<Vec<NodeAdvertisement>, NodeError> {
    // Peers without a discovery endpoint stay in the set but end the walk.
    let Some(discovery_url) = ad.dis.as_deref() else {
        return Ok(Vec::new());
    };

    let token = state.keystore.sign_claims(&ChallengeClaims {
        chl: random_challenge(),
        iat: unix_now(),
        sub: Some(state.config.node_id.clone()),
    })?;

    let body = state
        .http
        .get(discovery_url)
        .header(reqwest::header::AUTHORIZATION, token)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| NodeError::Peer(e.to_string()))?
        .text()
        .await
        .map_err(|e| NodeError::Peer(e.to_string()))?;

    let claims: DiscoveryResponseClaims = state.keystore.verify_node(&body)?;
    Ok(claims.peers)
}
