//! Node configuration options
//!
//! This module provides the cluster configuration recognized by a cache node,
//! with one field per documented option and a builder for programmatic setup.
//! Deployed nodes may override any option through `VNCACHE_*` environment
//! variables (see [`CacheConfig::from_env`]).

use std::net::SocketAddr;
use std::time::Duration;

use crate::discovery::NodeAdvertisement;

/// Cache node configuration.
///
/// # Examples
///
/// ```
/// use vncache_core::config::CacheConfig;
///
/// let cfg = CacheConfig::new("node-a")
///     .with_buckets(32)
///     .with_max_cache(1000);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// This node's identifier. Compared case-insensitively across the
    /// cluster.
    pub node_id: String,

    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Externally reachable base URL advertised to peers, e.g.
    /// `http://cache1.internal:2557`. When `None` the node advertises the
    /// bound address, which only works on flat networks.
    pub public_endpoint: Option<String>,

    /// Maximum entries per bucket (`max_cache`). Eviction is LRU by count.
    pub max_cache: usize,

    /// Number of buckets in the blob table (`buckets`).
    pub buckets: usize,

    /// Hard upper bound on a single FBM message (`max_message_size`).
    pub max_message_size: usize,

    /// Clamp range for the client-suggested receive buffer
    /// (`buffer_recv_min` / `buffer_recv_max`).
    pub buffer_recv_min: usize,
    pub buffer_recv_max: usize,

    /// Clamp range for the client-suggested header buffer
    /// (`buffer_header_min` / `buffer_header_max`).
    pub buffer_header_min: usize,
    pub buffer_header_max: usize,

    /// Interval between discovery sweeps (`discovery_interval_sec`).
    pub discovery_interval: Duration,

    /// Maximum peers the replication manager connects to (`max_peers`).
    pub max_peers: usize,

    /// Per-peer change queue capacity (`max_queue_depth`). Overflow drops
    /// the oldest event.
    pub max_queue_depth: usize,

    /// Interval between idle-queue purge sweeps (`queue_purge_interval_sec`).
    pub queue_purge_interval: Duration,

    /// Require the upgrade connection's remote address to match the `ip`
    /// claim of the negotiation token (`verify_ip`).
    pub verify_ip: bool,

    /// HTTP path of the connect/upgrade endpoint (`connect_path`).
    pub connect_path: String,

    /// HTTP path of the peer discovery endpoint (`discovery_path`).
    pub discovery_path: String,

    /// HTTP path of the unauthenticated self-advertisement endpoint
    /// (`well_known_path`).
    pub well_known_path: String,

    /// Admission limit for concurrent WebSocket sessions
    /// (`max_concurrent_connections`).
    pub max_concurrent_connections: usize,

    /// Statically configured peers seeded into every discovery sweep
    /// (`known_peers`).
    pub known_peers: Vec<NodeAdvertisement>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            bind_addr: ([127, 0, 0, 1], 0).into(),
            public_endpoint: None,
            max_cache: 10_000,
            buckets: 16,
            max_message_size: 1 << 20, // 1 MiB
            buffer_recv_min: 4096,
            buffer_recv_max: 1 << 20,
            buffer_header_min: 128,
            buffer_header_max: 8192,
            discovery_interval: Duration::from_secs(360),
            max_peers: 8,
            max_queue_depth: 1024,
            queue_purge_interval: Duration::from_secs(360),
            verify_ip: true,
            connect_path: "/cache".to_string(),
            discovery_path: "/discover".to_string(),
            well_known_path: "/.well-known/vncache".to_string(),
            max_concurrent_connections: 1000,
            known_peers: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given node id with default values.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Set the listener bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the advertised public base URL.
    pub fn with_public_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.public_endpoint = Some(endpoint.into());
        self
    }

    /// Set per-bucket entry capacity.
    pub fn with_max_cache(mut self, max: usize) -> Self {
        self.max_cache = max;
        self
    }

    /// Set the bucket count.
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Set the maximum FBM message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the receive buffer clamp range.
    pub fn with_recv_buffer_range(mut self, min: usize, max: usize) -> Self {
        self.buffer_recv_min = min;
        self.buffer_recv_max = max;
        self
    }

    /// Set the header buffer clamp range.
    pub fn with_header_buffer_range(mut self, min: usize, max: usize) -> Self {
        self.buffer_header_min = min;
        self.buffer_header_max = max;
        self
    }

    /// Set the discovery sweep interval.
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Set the replication peer cap.
    pub fn with_max_peers(mut self, max: usize) -> Self {
        self.max_peers = max;
        self
    }

    /// Set the per-peer change queue depth.
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the idle-queue purge interval.
    pub fn with_queue_purge_interval(mut self, interval: Duration) -> Self {
        self.queue_purge_interval = interval;
        self
    }

    /// Enable or disable remote-address verification on upgrade.
    pub fn with_verify_ip(mut self, verify: bool) -> Self {
        self.verify_ip = verify;
        self
    }

    /// Set the connect endpoint path.
    pub fn with_connect_path(mut self, path: impl Into<String>) -> Self {
        self.connect_path = path.into();
        self
    }

    /// Set the discovery endpoint path.
    pub fn with_discovery_path(mut self, path: impl Into<String>) -> Self {
        self.discovery_path = path.into();
        self
    }

    /// Set the well-known endpoint path.
    pub fn with_well_known_path(mut self, path: impl Into<String>) -> Self {
        self.well_known_path = path.into();
        self
    }

    /// Set the concurrent connection admission limit.
    pub fn with_max_concurrent_connections(mut self, max: usize) -> Self {
        self.max_concurrent_connections = max;
        self
    }

    /// Seed statically known peers.
    pub fn with_known_peers(mut self, peers: Vec<NodeAdvertisement>) -> Self {
        self.known_peers = peers;
        self
    }

    /// Clamp a client-suggested receive buffer size into the configured range.
    #[must_use]
    pub fn clamp_recv_buffer(&self, suggested: usize) -> usize {
        suggested.clamp(self.buffer_recv_min, self.buffer_recv_max)
    }

    /// Clamp a client-suggested header buffer size into the configured range.
    #[must_use]
    pub fn clamp_header_buffer(&self, suggested: usize) -> usize {
        suggested.clamp(self.buffer_header_min, self.buffer_header_max)
    }

    /// Clamp a client-suggested maximum message size.
    #[must_use]
    pub fn clamp_max_message(&self, suggested: usize) -> usize {
        suggested.min(self.max_message_size)
    }

    /// Apply `VNCACHE_*` environment overrides on top of this configuration.
    ///
    /// Recognized variables mirror the option names: `VNCACHE_MAX_CACHE`,
    /// `VNCACHE_BUCKETS`, `VNCACHE_MAX_MESSAGE_SIZE`,
    /// `VNCACHE_DISCOVERY_INTERVAL_SEC`, `VNCACHE_MAX_PEERS`,
    /// `VNCACHE_MAX_QUEUE_DEPTH`, `VNCACHE_QUEUE_PURGE_INTERVAL_SEC`,
    /// `VNCACHE_VERIFY_IP`, `VNCACHE_MAX_CONCURRENT_CONNECTIONS`.
    /// Malformed values are ignored with a warning.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(var = name, value = %raw, "ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(v) = parse("VNCACHE_MAX_CACHE") {
            self.max_cache = v;
        }
        if let Some(v) = parse("VNCACHE_BUCKETS") {
            self.buckets = v;
        }
        if let Some(v) = parse("VNCACHE_MAX_MESSAGE_SIZE") {
            self.max_message_size = v;
        }
        if let Some(v) = parse::<u64>("VNCACHE_DISCOVERY_INTERVAL_SEC") {
            self.discovery_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse("VNCACHE_MAX_PEERS") {
            self.max_peers = v;
        }
        if let Some(v) = parse("VNCACHE_MAX_QUEUE_DEPTH") {
            self.max_queue_depth = v;
        }
        if let Some(v) = parse::<u64>("VNCACHE_QUEUE_PURGE_INTERVAL_SEC") {
            self.queue_purge_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse("VNCACHE_VERIFY_IP") {
            self.verify_ip = v;
        }
        if let Some(v) = parse("VNCACHE_MAX_CONCURRENT_CONNECTIONS") {
            self.max_concurrent_connections = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let cfg = CacheConfig::new("node-a");
        assert_eq!(cfg.node_id, "node-a");
        assert_eq!(cfg.buckets, 16);
        assert_eq!(cfg.discovery_interval, Duration::from_secs(360));
        assert!(cfg.verify_ip);
        assert_eq!(cfg.well_known_path, "/.well-known/vncache");
    }

    #[test]
    fn test_builder_pattern() {
        let cfg = CacheConfig::new("node-b")
            .with_buckets(4)
            .with_max_cache(2)
            .with_max_peers(1)
            .with_verify_ip(false);

        assert_eq!(cfg.buckets, 4);
        assert_eq!(cfg.max_cache, 2);
        assert_eq!(cfg.max_peers, 1);
        assert!(!cfg.verify_ip);
    }

    #[test]
    fn test_buffer_clamping() {
        let cfg = CacheConfig::new("n").with_recv_buffer_range(1024, 4096);

        assert_eq!(cfg.clamp_recv_buffer(100), 1024);
        assert_eq!(cfg.clamp_recv_buffer(2048), 2048);
        assert_eq!(cfg.clamp_recv_buffer(1 << 30), 4096);
    }

    #[test]
    fn test_max_message_clamp_never_exceeds_configured() {
        let cfg = CacheConfig::new("n").with_max_message_size(1 << 16);
        assert_eq!(cfg.clamp_max_message(1 << 30), 1 << 16);
        assert_eq!(cfg.clamp_max_message(512), 512);
    }
}
