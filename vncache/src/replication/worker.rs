//! Per-peer replication worker.
//!
//! One worker per discovered peer: negotiate a connection with this node's
//! cache-node key, then run several change-dequeue loops over it. Each
//! event either deletes locally or pulls the fresh blob with a bounded GET
//! and writes it in. Any connection error stops the worker; the manager
//! reschedules the peer on the next discovery sweep.
//!
//! Replicated writes re-emit change events without origin tracking; two
//! peers mirroring each other oscillate at worst within their bounded
//! queue depths.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vncache_core::discovery::NodeAdvertisement;
use vncache_core::error::CacheError;
use vncache_fbm::client::FbmClient;
use vncache_fbm::header::Status;

use crate::node::NodeState;
use crate::replication::connector::CacheConnector;

/// Deadline for the follow-up GET after a `modified` event.
const PULL_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn run_peer_worker(state: Arc<NodeState>, peer: NodeAdvertisement) {
    info!(peer = %peer, "replication worker connecting");

    let connector = CacheConnector::peer(Arc::clone(&state.keystore), state.identity.clone())
    .with_buffer_suggestions(
        state.config.buffer_recv_max,
        state.config.buffer_header_max,
        state.config.max_message_size,
    );

    let client = match connector.connect(&peer.url).await {
        Ok(client) => client,
        Err(e) => {
            warn!(peer = %peer, error = %e, "replication connect failed");
            return;
        }
    };

    // N parallel dequeue loops over the one connection keep the stream
    // drained while pulls are in flight.
    let loops = num_cpus::get().max(1);
    let stop = state.exit.child_token();
    let mut handles = Vec::with_capacity(loops);
    for index in 0..loops {
        handles.push(tokio::spawn(dequeue_loop(
            Arc::clone(&state),
            Arc::clone(&client),
            stop.clone(),
            index,
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
    client.close();
    info!(peer = %peer, "replication worker stopped");
}

async fn dequeue_loop(
    state: Arc<NodeState>,
    client: Arc<FbmClient>,
    stop: CancellationToken,
    index: usize,
) {
    loop {
        let response = tokio::select! {
            () = stop.cancelled() => break,
            resp = client.dequeue_event() => resp,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!(index, error = %e, "dequeue loop losing connection");
                stop.cancel();
                break;
            }
        };

        match response.status {
            // The peer does not serve change streams to us.
            Status::NotFound => {
                info!(index, "peer is not configured for replication");
                stop.cancel();
                break;
            }
            Status::Deleted => {
                if let Some(id) = response.object_id.as_deref() {
                    state.apply_delete(id).await;
                }
            }
            Status::Modified => {
                let Some(current) = response.object_id.clone() else {
                    debug!(index, "modified event without object id");
                    continue;
                };
                let effective = response
                    .new_object_id
                    .clone()
                    .unwrap_or_else(|| current.clone());
                match client.get_with_timeout(&effective, PULL_TIMEOUT).await {
                    Ok(Some(body)) => {
                        apply_modified(&state, &current, &effective, body).await;
                    }
                    // The entry changed again or was evicted before our
                    // pull; a later event covers it.
                    Ok(None) => debug!(index, key = %effective, "pull found nothing"),
                    Err(e) => {
                        debug!(index, error = %e, "pull failed, dropping connection");
                        stop.cancel();
                        break;
                    }
                }
            }
            status => debug!(index, ?status, "unexpected dequeue status"),
        }
    }
}

async fn apply_modified(
    state: &Arc<NodeState>,
    current: &str,
    effective: &str,
    body: bytes::Bytes,
) {
    if current == effective {
        let _ = state.apply_upsert(current, body).await;
        return;
    }
    match state.apply_rename(current, effective, body.clone()).await {
        Ok(()) => {}
        // Local destination already exists (independent write raced the
        // replicated rename). Converge on the rename outcome.
        Err(CacheError::Conflict) => {
            state.apply_delete(current).await;
            let _ = state.apply_upsert(effective, body).await;
        }
        Err(e) => debug!(error = %e, "replicated rename refused"),
    }
}
