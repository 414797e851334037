//! Node state and lifecycle.
//!
//! All process-wide state (instance audience id, admission counter, change
//! pipeline, exit token) lives in one [`NodeState`] created at startup and
//! passed explicitly; components never reach back through globals.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vncache_core::config::CacheConfig;
use vncache_core::discovery::{NodeAdvertisement, NodeDiscoveryCollection};
use vncache_core::error::CacheError;
use vncache_core::events::queue::PeerQueueManager;
use vncache_core::events::ChangeEvent;
use vncache_core::extension::{CacheExtension, NullExtension};
use vncache_core::store::table::BlobTable;

use crate::auth::keystore::Keystore;
use crate::auth::{random_id, AuthError};
use crate::peers::monitor::PeerMonitor;
use crate::{peers, replication, server};

/// Capacity of the local change pipeline feeding the peer fan-out.
const CHANGE_PIPELINE_DEPTH: usize = 64;

/// Largest batch the pipeline pump hands to the fan-out in one go.
const CHANGE_BATCH: usize = 64;

/// Node startup and runtime errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer request failed: {0}")]
    Peer(String),
}

/// Process-wide state shared by every component of one node.
pub struct NodeState {
    pub config: CacheConfig,
    pub keystore: Arc<Keystore>,
    /// This node's own advertisement.
    pub identity: NodeAdvertisement,
    /// Random 128-bit audience id, fresh per process.
    pub instance_id: String,
    pub table: BlobTable,
    pub extension: Arc<dyn CacheExtension>,
    pub queues: Arc<PeerQueueManager>,
    pub monitor: PeerMonitor,
    pub discovered: NodeDiscoveryCollection,
    pub exit: CancellationToken,
    pub http: reqwest::Client,
    connections: AtomicUsize,
    change_tx: flume::Sender<ChangeEvent>,
    change_rx: flume::Receiver<ChangeEvent>,
    /// Discovery sweeps nudge the replication manager here.
    resweep_tx: flume::Sender<()>,
    resweep_rx: flume::Receiver<()>,
}

impl NodeState {
    fn new(
        config: CacheConfig,
        keystore: Keystore,
        extension: Arc<dyn CacheExtension>,
        base_url: &str,
    ) -> Arc<Self> {
        let identity = NodeAdvertisement::new(
            config.node_id.clone(),
            format!("{base_url}{}", config.connect_path),
        )
        .with_discovery(format!("{base_url}{}", config.discovery_path));

        let (change_tx, change_rx) = flume::bounded(CHANGE_PIPELINE_DEPTH);
        let (resweep_tx, resweep_rx) = flume::bounded(1);
        Arc::new(Self {
            table: BlobTable::new(config.buckets, config.max_cache),
            queues: Arc::new(PeerQueueManager::new(config.max_queue_depth)),
            monitor: PeerMonitor::new(),
            discovered: NodeDiscoveryCollection::new(),
            instance_id: random_id(),
            exit: CancellationToken::new(),
            http: reqwest::Client::new(),
            connections: AtomicUsize::new(0),
            identity,
            keystore: Arc::new(keystore),
            extension,
            config,
            change_tx,
            change_rx,
            resweep_tx,
            resweep_rx,
        })
    }

    /// Insert or overwrite `key` and emit one change event.
    pub async fn apply_upsert(&self, key: &str, body: Bytes) -> Result<(), CacheError> {
        let evicted = self.table.upsert(key, body);
        if let Some((evicted_key, blob)) = evicted {
            self.extension.on_entry_evicted(&evicted_key, blob).await;
        }
        self.emit(ChangeEvent::modified(key));
        Ok(())
    }

    /// Atomically rename `old_key` to `new_key` with fresh contents and
    /// emit one change event describing the rename.
    pub async fn apply_rename(
        &self,
        old_key: &str,
        new_key: &str,
        body: Bytes,
    ) -> Result<(), CacheError> {
        let evicted = self.table.upsert_rename(old_key, new_key, body)?;
        if let Some((evicted_key, blob)) = evicted {
            self.extension.on_entry_evicted(&evicted_key, blob).await;
        }
        self.emit(ChangeEvent::renamed(old_key, new_key));
        Ok(())
    }

    /// Remove `key`. Emits a delete event only on an actual hit.
    pub async fn apply_delete(&self, key: &str) -> bool {
        if self.table.remove(key).is_some() {
            self.emit(ChangeEvent::deleted(key));
            true
        } else {
            false
        }
    }

    /// GET with the miss hook: a backing store may repopulate the table.
    pub async fn lookup(&self, key: &str) -> Option<Bytes> {
        if let Some(blob) = self.table.get(key) {
            return Some(blob);
        }
        let blob = self.extension.on_cache_miss(key).await?;
        // Repopulation is not a client mutation; no event is emitted.
        if let Some((evicted_key, evicted)) = self.table.upsert(key, blob.clone()) {
            self.extension.on_entry_evicted(&evicted_key, evicted).await;
        }
        Some(blob)
    }

    /// Try to take a connection slot. `None` means the admission limit is
    /// reached and the upgrade must answer 503.
    pub fn try_acquire_connection(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let mut current = self.connections.load(Ordering::SeqCst);
        loop {
            if current >= self.config.max_concurrent_connections {
                return None;
            }
            match self.connections.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(ConnectionPermit(Arc::clone(self))),
                Err(observed) => current = observed,
            }
        }
    }

    /// Currently admitted WebSocket sessions.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Snapshot of peers found by the last discovery sweep.
    #[must_use]
    pub fn known_peers(&self) -> Vec<NodeAdvertisement> {
        self.discovered.snapshot()
    }

    /// Non-blocking enqueue into the local change pipeline; overflow sheds
    /// the oldest event.
    fn emit(&self, event: ChangeEvent) {
        let mut ev = event;
        loop {
            match self.change_tx.try_send(ev) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(back)) => {
                    debug!("change pipeline full, shedding oldest");
                    let _ = self.change_rx.try_recv();
                    ev = back;
                }
                Err(flume::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub(crate) fn nudge_replication(&self) {
        let _ = self.resweep_tx.try_send(());
    }

    pub(crate) fn resweep_rx(&self) -> flume::Receiver<()> {
        self.resweep_rx.clone()
    }
}

/// RAII admission slot; dropping it frees the connection count.
pub struct ConnectionPermit(Arc<NodeState>);

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running cache node.
pub struct Node {
    state: Arc<NodeState>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind the listener and start every background loop with the default
    /// in-memory extension.
    pub async fn start(config: CacheConfig, keystore: Keystore) -> Result<Self, NodeError> {
        Self::start_with_extension(config, keystore, Arc::new(NullExtension)).await
    }

    /// Bind the listener and start every background loop.
    pub async fn start_with_extension(
        config: CacheConfig,
        keystore: Keystore,
        extension: Arc<dyn CacheExtension>,
    ) -> Result<Self, NodeError> {
        if config.node_id.is_empty() {
            return Err(NodeError::Config("node_id must be set".to_string()));
        }

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let base_url = config
            .public_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{local_addr}"));

        let state = NodeState::new(config, keystore, extension, &base_url);
        info!(
            node = %state.config.node_id,
            addr = %local_addr,
            instance = %state.instance_id,
            "cache node starting"
        );

        let tasks = vec![
            tokio::spawn(server::serve(Arc::clone(&state), listener)),
            tokio::spawn(run_change_pump(Arc::clone(&state))),
            tokio::spawn(run_queue_purge(Arc::clone(&state))),
            tokio::spawn(peers::discovery::run_discovery_loop(Arc::clone(&state))),
            tokio::spawn(replication::run_replication_manager(Arc::clone(&state))),
        ];

        Ok(Self {
            state,
            local_addr,
            tasks,
        })
    }

    /// Shared node state (tests and embedders).
    #[must_use]
    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    /// The bound listener address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's advertisement.
    #[must_use]
    pub fn advertisement(&self) -> NodeAdvertisement {
        self.state.identity.clone()
    }

    /// Base URL of the step-1 connect endpoint.
    #[must_use]
    pub fn connect_url(&self) -> String {
        self.state.identity.url.clone()
    }

    /// Cancel the exit token, close the listener and join every loop.
    pub async fn shutdown(self) {
        info!(node = %self.state.config.node_id, "cache node shutting down");
        self.state.exit.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
    }
}

/// Drain the local change pipeline in batches into the peer fan-out.
async fn run_change_pump(state: Arc<NodeState>) {
    loop {
        let first = tokio::select! {
            () = state.exit.cancelled() => break,
            ev = state.change_rx.recv_async() => match ev {
                Ok(ev) => ev,
                Err(_) => break,
            },
        };
        let mut batch = Vec::with_capacity(CHANGE_BATCH);
        batch.push(first);
        while batch.len() < CHANGE_BATCH {
            match state.change_rx.try_recv() {
                Ok(ev) => batch.push(ev),
                Err(_) => break,
            }
        }
        state.queues.publish_many(&batch);
    }
}

/// Reclaim queues whose peers stayed away for a whole purge interval.
async fn run_queue_purge(state: Arc<NodeState>) {
    let mut ticker = tokio::time::interval(state.config.queue_purge_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick is not a sweep
    loop {
        tokio::select! {
            () = state.exit.cancelled() => break,
            _ = ticker.tick() => state.queues.purge_idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> Arc<NodeState> {
        NodeState::new(
            CacheConfig::new("test-node").with_max_concurrent_connections(2),
            Keystore::generate().unwrap(),
            Arc::new(NullExtension),
            "http://127.0.0.1:9",
        )
    }

    #[test]
    fn test_identity_is_derived_from_config_paths() {
        let state = test_state();
        assert_eq!(state.identity.iss, "test-node");
        assert_eq!(state.identity.url, "http://127.0.0.1:9/cache");
        assert_eq!(
            state.identity.dis.as_deref(),
            Some("http://127.0.0.1:9/discover")
        );
    }

    #[test]
    fn test_connection_admission() {
        let state = test_state();
        let p1 = state.try_acquire_connection().unwrap();
        let _p2 = state.try_acquire_connection().unwrap();
        assert!(state.try_acquire_connection().is_none());
        assert_eq!(state.active_connections(), 2);

        drop(p1);
        assert_eq!(state.active_connections(), 1);
        assert!(state.try_acquire_connection().is_some());
    }

    #[tokio::test]
    async fn test_mutations_feed_the_pipeline() {
        let state = test_state();
        state
            .apply_upsert("user:1", Bytes::from_static(b"alpha"))
            .await
            .unwrap();
        assert!(state.apply_delete("user:1").await);
        assert!(!state.apply_delete("user:1").await);

        let first = state.change_rx.try_recv().unwrap();
        assert!(!first.deleted);
        let second = state.change_rx.try_recv().unwrap();
        assert!(second.deleted);
        assert!(state.change_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pipeline_sheds_oldest_on_overflow() {
        let state = test_state();
        for i in 0..(CHANGE_PIPELINE_DEPTH + 8) {
            state
                .apply_upsert(&format!("key:{i}"), Bytes::from_static(b"v"))
                .await
                .unwrap();
        }
        // The eight oldest events were shed.
        let first = state.change_rx.try_recv().unwrap();
        assert_eq!(&*first.current_id, "key:8");
    }
}
