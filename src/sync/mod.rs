//! Synchronization loops
//!
//! Two independent background loops drive replication without any central
//! coordinator:
//!
//! - [`Reconciler`]: periodically walks the local directory and converges
//!   every file onto its responsible nodes, detecting content conflicts.
//! - [`AntiEntropy`]: periodically relocates one random file to one random
//!   peer, independent of placement.

pub mod reconcile;
pub mod anti_entropy;

pub use anti_entropy::{AntiEntropy, GossipOutcome};
pub use reconcile::{CycleReport, Reconciler};
