//! Loopback cluster helpers shared by the unit tests

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::node::{shutdown_channel, NodeContext};
use crate::transfer::{TransferClient, TransferServer};

/// One node of a test cluster, serving on 127.0.0.1
pub(crate) struct TestNode {
    pub ctx: Arc<NodeContext>,
    pub dir: TempDir,
    pub address: String,
    _shutdown: watch::Sender<bool>,
}

impl TestNode {
    pub fn id(&self) -> &str {
        self.ctx.node_id()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).unwrap();
    }

    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path(name)).ok()
    }

    pub fn client(&self) -> TransferClient {
        TransferClient::new(Arc::clone(&self.ctx))
    }

    /// Regular files in the node's directory, sorted
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

/// Start one transfer server per id and return the running nodes
pub(crate) async fn start_cluster(ids: &[&str], replication_factor: usize) -> Vec<TestNode> {
    start_cluster_with(ids, |config| config.cluster.replication_factor = replication_factor).await
}

/// Like [`start_cluster`], with a hook to adjust each node's configuration
pub(crate) async fn start_cluster_with<F>(ids: &[&str], configure: F) -> Vec<TestNode>
where
    F: Fn(&mut SyncConfig),
{
    let mut listeners = Vec::new();
    let mut nodes = BTreeMap::new();
    for id in ids {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        nodes.insert(id.to_string(), listener.local_addr().unwrap().to_string());
        listeners.push(listener);
    }

    let mut cluster = Vec::new();
    for (id, listener) in ids.iter().zip(listeners) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::new(*id, dir.path(), nodes.clone());
        config.sync.connect_timeout_ms = 2000;
        config.sync.io_timeout_ms = 5000;
        configure(&mut config);

        let ctx = NodeContext::new(config).unwrap();
        let server = TransferServer::from_listener(listener, Arc::clone(&ctx));
        let (tx, signal) = shutdown_channel();
        tokio::spawn(server.run(signal));

        cluster.push(TestNode {
            address: nodes[*id].clone(),
            ctx,
            dir,
            _shutdown: tx,
        });
    }
    cluster
}
