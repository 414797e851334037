//! Connected-peer monitor.
//!
//! Tracks which peer nodes currently hold at least one session, counting
//! sessions so a peer that reconnects on several sockets stays registered
//! until the last one closes. Exposes snapshot lists only; nothing holds a
//! reference into the map.

use dashmap::DashMap;
use tracing::debug;
use vncache_core::discovery::NodeAdvertisement;

struct PeerEntry {
    ad: NodeAdvertisement,
    sessions: usize,
}

/// Registry of currently connected peer sessions.
#[derive(Default)]
pub struct PeerMonitor {
    peers: DashMap<String, PeerEntry>,
}

impl PeerMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one peer session. The freshest advertisement wins, so a peer
    /// that moved endpoints updates in place.
    pub fn register(&self, ad: NodeAdvertisement) {
        let key = ad.iss.to_ascii_lowercase();
        debug!(peer = %key, "peer session registered");
        self.peers
            .entry(key)
            .and_modify(|entry| {
                entry.sessions += 1;
                entry.ad = ad.clone();
            })
            .or_insert(PeerEntry { ad, sessions: 1 });
    }

    /// Drop one peer session; the peer disappears with its last session.
    pub fn unregister(&self, node_id: &str) {
        let key = node_id.to_ascii_lowercase();
        let remove = match self.peers.get_mut(&key) {
            Some(mut entry) => {
                entry.sessions = entry.sessions.saturating_sub(1);
                entry.sessions == 0
            }
            None => false,
        };
        if remove {
            debug!(peer = %key, "last peer session gone");
            self.peers.remove(&key);
        }
    }

    /// Advertisements of all currently connected peers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeAdvertisement> {
        self.peers.iter().map(|entry| entry.ad.clone()).collect()
    }

    /// Number of distinct connected peers.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }
}
