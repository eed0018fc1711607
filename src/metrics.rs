//! Counters for transfer, reconciliation and error outcomes

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide outcome counters
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Files pushed to a peer with SEND_FILE
    pub files_sent: AtomicU64,
    /// Files accepted from a peer's SEND_FILE
    pub files_received: AtomicU64,
    /// REQUEST_FILE calls answered with content
    pub files_served: AtomicU64,
    /// Files downloaded with REQUEST_FILE
    pub files_fetched: AtomicU64,
    /// REQUEST_FILE answered or received with NOT_FOUND
    pub not_found: AtomicU64,
    /// Control messages with an unsupported action
    pub unknown_actions: AtomicU64,
    /// Transfers that ended before the declared size
    pub truncated_transfers: AtomicU64,
    /// Transfers whose content failed digest verification
    pub checksum_mismatches: AtomicU64,
    /// Replicas found with differing content
    pub conflicts: AtomicU64,
    /// Conflicts whose fetched copy was not kept
    pub conflict_renames_skipped: AtomicU64,
    /// Local copies removed after pushing to the responsible set
    pub handoffs: AtomicU64,
    /// Copies pushed to responsible nodes that lacked the file
    pub repairs: AtomicU64,
    /// Files moved by the anti-entropy pusher
    pub relocations: AtomicU64,
    /// Local disk failures
    pub io_errors: AtomicU64,
    /// Connection and protocol failures
    pub network_errors: AtomicU64,
    /// Completed reconciliation cycles
    pub reconcile_cycles: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub files_sent: u64,
    pub files_received: u64,
    pub files_served: u64,
    pub files_fetched: u64,
    pub not_found: u64,
    pub unknown_actions: u64,
    pub truncated_transfers: u64,
    pub checksum_mismatches: u64,
    pub conflicts: u64,
    pub conflict_renames_skipped: u64,
    pub handoffs: u64,
    pub repairs: u64,
    pub relocations: u64,
    pub io_errors: u64,
    pub network_errors: u64,
    pub reconcile_cycles: u64,
}

impl SyncMetrics {
    /// Increment a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure under the matching bucket
    pub fn record_error(&self, err: &crate::Error) {
        match err {
            crate::Error::TruncatedTransfer { .. } => Self::incr(&self.truncated_transfers),
            crate::Error::ChecksumMismatch { .. } => Self::incr(&self.checksum_mismatches),
            e if e.is_network() => Self::incr(&self.network_errors),
            _ => Self::incr(&self.io_errors),
        }
    }

    /// Read every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_received: self.files_received.load(Ordering::Relaxed),
            files_served: self.files_served.load(Ordering::Relaxed),
            files_fetched: self.files_fetched.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            unknown_actions: self.unknown_actions.load(Ordering::Relaxed),
            truncated_transfers: self.truncated_transfers.load(Ordering::Relaxed),
            checksum_mismatches: self.checksum_mismatches.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            conflict_renames_skipped: self.conflict_renames_skipped.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            relocations: self.relocations.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            reconcile_cycles: self.reconcile_cycles.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_record_error_buckets() {
        let metrics = SyncMetrics::default();
        metrics.record_error(&Error::ConnectionTimeout("n:1".into()));
        metrics.record_error(&Error::TruncatedTransfer {
            filename: "a".into(),
            expected: 10,
            received: 3,
        });
        metrics.record_error(&Error::Io(std::io::Error::other("disk full")));
        SyncMetrics::incr(&metrics.conflicts);

        let snap = metrics.snapshot();
        assert_eq!(snap.network_errors, 1);
        assert_eq!(snap.truncated_transfers, 1);
        assert_eq!(snap.io_errors, 1);
        assert_eq!(snap.conflicts, 1);
        assert_eq!(snap.files_sent, 0);
    }
}
