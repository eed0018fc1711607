//! Node context
//!
//! Bundles the immutable configuration with the process-wide shared state
//! (local store, checksum cache, filename locks, conflict log, counters) so that every
//! component receives it explicitly at construction.

use std::sync::Arc;

use tokio::sync::watch;

use crate::checksum::ChecksumCache;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::metrics::SyncMetrics;
use crate::placement::Placement;
use crate::store::{ConflictLog, FileLocks, LocalStore};

/// Shared state of one running node
pub struct NodeContext {
    pub config: Arc<SyncConfig>,
    pub placement: Placement,
    pub store: LocalStore,
    pub checksums: ChecksumCache,
    pub locks: FileLocks,
    pub conflicts: ConflictLog,
    pub metrics: SyncMetrics,
}

impl NodeContext {
    /// Validate `config` and open the local store
    pub fn new(config: SyncConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let placement = Placement::from_config(&config)?;
        let store = LocalStore::open(config.data_dir())?;
        let checksums = ChecksumCache::new(
            config.cache.capacity,
            config.cache_max_age(),
            config.sync.chunk_size,
        );

        Ok(Arc::new(Self {
            config: Arc::new(config),
            placement,
            store,
            checksums,
            locks: FileLocks::new(),
            conflicts: ConflictLog::new(),
            metrics: SyncMetrics::default(),
        }))
    }

    /// This node's identifier
    pub fn node_id(&self) -> &str {
        &self.config.node.id
    }

    /// Transfer chunk size
    pub fn chunk_size(&self) -> usize {
        self.config.sync.chunk_size
    }

    /// Responsible nodes for `filename`, primary first
    pub fn responsible(&self, filename: &str) -> Vec<String> {
        self.placement.responsible(filename)
    }

    /// Digest of a local file through the shared cache
    pub async fn digest_of(&self, filename: &str) -> Result<String> {
        let path = self.store.path_of(filename)?;
        self.checksums.digest_of(&path).await
    }
}

/// Create a shutdown trigger and the signal handed to long-lived tasks
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, ShutdownSignal(rx))
}

/// Receiving side of the shutdown trigger
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolve once shutdown is requested or the trigger is dropped
    pub async fn wait(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_context_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::new("node1", dir.path(), BTreeMap::new());
        assert!(NodeContext::new(config).is_err());
    }

    #[tokio::test]
    async fn test_context_digest_of() {
        let dir = tempdir().unwrap();
        let mut nodes = BTreeMap::new();
        nodes.insert("node1".to_string(), "127.0.0.1:5000".to_string());
        let ctx = NodeContext::new(SyncConfig::new("node1", dir.path(), nodes)).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"abc").unwrap();
        assert_eq!(
            ctx.digest_of("a.txt").await.unwrap(),
            crate::checksum::digest_bytes(b"abc")
        );
        assert!(ctx.digest_of("../a.txt").await.is_err());
        assert_eq!(ctx.responsible("a.txt"), vec!["node1".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (tx, mut signal) = shutdown_channel();

        let waiter = tokio::spawn(async move { signal.wait().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (tx, mut signal) = shutdown_channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
