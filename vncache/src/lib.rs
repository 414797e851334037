//! # VNCache
//!
//! A distributed in-memory object cache: opaque blobs under string keys,
//! served over a framed WebSocket protocol, replicated between peer nodes
//! through per-peer change streams.
//!
//! ## Architecture
//!
//! The workspace is layered:
//!
//! - **`vncache-core`**: the transport-free kernel: LRU blob buckets and
//!   the hash-routed table, change events with per-peer bounded queues,
//!   the known-peer collection, configuration
//! - **`vncache-fbm`**: the wire protocol: header/frame codec and the
//!   multiplexing client
//! - **`vncache`**: this crate, the node itself: negotiation and auth,
//!   the HTTP/WebSocket server, discovery sweeps and replication workers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vncache::{CacheConfig, Keystore, Node};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Provision an identity and start a node.
//! let keystore = Keystore::generate()?;
//! let config = CacheConfig::new("node-a")
//!     .with_bind_addr("0.0.0.0:2557".parse()?);
//! let node = Node::start(config, keystore).await?;
//!
//! println!("connect endpoint: {}", node.connect_url());
//! # Ok(())
//! # }
//! ```
//!
//! Clients connect through [`CacheConnector`], which runs the signed
//! two-step handshake and returns a multiplexing
//! [`FbmClient`](vncache_fbm::client::FbmClient):
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vncache::{CacheConnector, Keystore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pem = std::fs::read_to_string("client.pem")?;
//! let keys = Arc::new(Keystore::from_pem(&pem)?);
//! let client = CacheConnector::client(keys)
//!     .connect("http://cache1.internal:2557/cache")
//!     .await?;
//!
//! client.upsert("user:1", "alpha".into()).await?;
//! let blob = client.get("user:1").await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

pub mod auth;
pub mod node;
pub mod peers;
pub mod replication;

pub(crate) mod server;

/// Development helpers (benches/tests)
pub mod dev_tracing;

// Re-export the layered crates for embedders.
pub use vncache_core as core;
pub use vncache_fbm as fbm;

// The common surface, flattened.
pub use auth::keystore::Keystore;
pub use auth::TrustClass;
pub use node::{Node, NodeError, NodeState};
pub use replication::connector::{CacheConnector, ConnectError};
pub use vncache_core::config::CacheConfig;
pub use vncache_core::discovery::NodeAdvertisement;
pub use vncache_fbm::client::FbmClient;
