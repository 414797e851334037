//! Known-peer advertisements.
//!
//! An advertisement is a node's self-description for discovery: its id, the
//! cache connect endpoint and, when the node participates in discovery, the
//! endpoint that returns its peer list. The wire shape (claim names `iss`,
//! `url`, `dis`) is fixed for interop.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Self-description of one cache node.
///
/// Equality is on the node id and is case-insensitive; endpoints do not
/// participate so a node that moves keeps its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAdvertisement {
    /// The advertising node's id.
    pub iss: String,
    /// Cache connect endpoint (HTTP URL, upgraded to WebSocket in place).
    pub url: String,
    /// Discovery endpoint, absent on nodes that do not serve discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dis: Option<String>,
}

impl NodeAdvertisement {
    #[must_use]
    pub fn new(node_id: impl Into<String>, connect_url: impl Into<String>) -> Self {
        Self {
            iss: node_id.into(),
            url: connect_url.into(),
            dis: None,
        }
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery_url: impl Into<String>) -> Self {
        self.dis = Some(discovery_url.into());
        self
    }

    /// Case-insensitive id comparison, the cluster-wide notion of identity.
    #[must_use]
    pub fn same_node(&self, other_id: &str) -> bool {
        self.iss.eq_ignore_ascii_case(other_id)
    }
}

impl PartialEq for NodeAdvertisement {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(&other.iss)
    }
}

impl Eq for NodeAdvertisement {}

impl fmt::Display for NodeAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.iss, self.url)
    }
}

/// The set of advertisements a node currently knows about, replaced
/// wholesale by each discovery sweep. Readers get array snapshots; the
/// collection itself is never handed out.
#[derive(Default)]
pub struct NodeDiscoveryCollection {
    peers: RwLock<Vec<NodeAdvertisement>>,
}

impl NodeDiscoveryCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current peer set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeAdvertisement> {
        self.peers.read().clone()
    }

    /// Replace the collection with a sweep result.
    pub fn replace(&self, peers: Vec<NodeAdvertisement>) {
        *self.peers.write() = peers;
    }

    /// True when `node_id` is a currently known peer.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.read().iter().any(|p| p.same_node(node_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_case_insensitive() {
        let a = NodeAdvertisement::new("Node-A", "http://a:2557/cache");
        let b = NodeAdvertisement::new("node-a", "http://elsewhere:2557/cache");
        assert_eq!(a, b);
        assert!(a.same_node("NODE-A"));
        assert!(!a.same_node("node-b"));
    }

    #[test]
    fn test_wire_shape() {
        let ad = NodeAdvertisement::new("node-a", "http://a:2557/cache")
            .with_discovery("http://a:2557/discover");
        let json = serde_json::to_value(&ad).unwrap();
        assert_eq!(json["iss"], "node-a");
        assert_eq!(json["url"], "http://a:2557/cache");
        assert_eq!(json["dis"], "http://a:2557/discover");

        // `dis` is omitted entirely when absent
        let bare = NodeAdvertisement::new("node-b", "http://b:2557/cache");
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("dis"));
    }

    #[test]
    fn test_collection_replace_and_snapshot() {
        let coll = NodeDiscoveryCollection::new();
        assert!(coll.is_empty());

        coll.replace(vec![
            NodeAdvertisement::new("node-a", "http://a/cache"),
            NodeAdvertisement::new("node-b", "http://b/cache"),
        ]);
        assert_eq!(coll.len(), 2);
        assert!(coll.contains("NODE-B"));

        let snap = coll.snapshot();
        coll.replace(vec![]);
        // Snapshot is a copy, unaffected by the replace.
        assert_eq!(snap.len(), 2);
        assert!(coll.is_empty());
    }
}
