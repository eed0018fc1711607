//! WolfSync - Peer-to-peer File Replication Engine
//!
//! Keeps a flat directory of files replicated across a fixed cluster of
//! nodes. Every node runs the same program and there is no coordinator.
//!
//! # Architecture
//!
//! Each file name hashes (SHA-256) onto a primary node and the members that
//! follow it in sorted order, up to the replication factor. Nodes talk to
//! each other over a small TCP protocol of length-prefixed JSON control
//! messages followed by raw file bytes.
//!
//! # Features
//!
//! - Deterministic placement with a configurable salt
//! - Cached, mtime-validated content digests
//! - Staged, size- and digest-verified transfers
//! - Periodic reconciliation with conflict preservation, replica repair
//!   and hand-off of misplaced copies
//! - Random anti-entropy relocation
//! - HTTP API for status, counters and placement lookups

pub mod config;
pub mod error;
pub mod metrics;
pub mod placement;
pub mod checksum;
pub mod store;
pub mod node;
pub mod transfer;
pub mod sync;
pub mod api;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::node::{shutdown_channel, NodeContext, ShutdownSignal};
    pub use crate::placement::Placement;
    pub use crate::sync::{AntiEntropy, CycleReport, GossipOutcome, Reconciler};
    pub use crate::transfer::{FetchOutcome, TransferClient, TransferServer};
}
