//! Peer replication.
//!
//! The manager watches the discovery collection and keeps one worker per
//! known peer (up to `max_peers`). A worker owns one negotiated connection
//! and follows the peer's change stream; when it dies, the slot frees and
//! the next discovery sweep reschedules it.

pub mod connector;

pub(crate) mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::node::NodeState;

pub(crate) async fn run_replication_manager(state: Arc<NodeState>) {
    let resweep = state.resweep_rx();
    let mut active: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            () = state.exit.cancelled() => break,
            nudge = resweep.recv_async() => {
                if nudge.is_err() {
                    break;
                }
            }
        }

        active.retain(|_, handle| !handle.is_finished());

        for peer in state.discovered.snapshot() {
            if active.len() >= state.config.max_peers {
                debug!("replication peer cap reached");
                break;
            }
            if peer.same_node(&state.config.node_id) {
                continue;
            }
            let key = peer.iss.to_ascii_lowercase();
            if active.contains_key(&key) {
                continue;
            }
            let handle = tokio::spawn(worker::run_peer_worker(Arc::clone(&state), peer));
            active.insert(key, handle);
        }
    }

    for (_, handle) in active {
        handle.abort();
    }
}
