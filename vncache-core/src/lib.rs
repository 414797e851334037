//! VNCache Core
//!
//! This crate contains the transport-agnostic core building blocks:
//! - Blob store: LRU buckets + hash-routed table (`store`)
//! - Change events + per-peer bounded queues (`events`)
//! - Known-peer advertisement collection (`discovery`)
//! - Node configuration (`config`)
//! - Backing-store capability hooks (`extension`)
//! - Error types (`error`)
//!
//! Nothing in here performs I/O; the `vncache` crate wires these pieces to
//! the WebSocket/HTTP surface.

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod extension;

pub mod events {
    pub mod queue;

    mod change;
    pub use change::ChangeEvent;
}

pub mod store {
    pub mod bucket;
    pub mod table;

    mod hash;
    pub use hash::{bucket_index, fnv1a_32, valid_key, MIN_KEY_LEN};
}

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::config::CacheConfig;
    pub use crate::discovery::{NodeAdvertisement, NodeDiscoveryCollection};
    pub use crate::error::{CacheError, Result};
    pub use crate::events::queue::{PeerQueueManager, QueueSubscription};
    pub use crate::events::ChangeEvent;
    pub use crate::extension::{CacheExtension, NullExtension};
    pub use crate::store::bucket::Bucket;
    pub use crate::store::table::BlobTable;
}
