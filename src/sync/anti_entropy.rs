//! Anti-entropy
//!
//! Periodically picks one random local file and one random cluster member
//! and moves the file there, regardless of placement. Reconciliation later
//! pulls it back onto its responsible nodes, so relocations keep peers
//! exercising each other's transfer paths without losing data.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::SyncMetrics;
use crate::node::{NodeContext, ShutdownSignal};
use crate::transfer::TransferClient;

/// What one anti-entropy round did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipOutcome {
    /// Nothing to send
    EmptyDirectory,
    /// The random pick landed on this node; the file stays
    SelectedSelf { filename: String },
    /// The file was sent to `node_id` and removed locally
    Relocated {
        filename: String,
        node_id: String,
        bytes: u64,
    },
}

/// Pick a file and a target member uniformly at random
pub fn choose_pair<'a, R: Rng + ?Sized>(
    files: &'a [String],
    members: &'a [String],
    rng: &mut R,
) -> Option<(&'a str, &'a str)> {
    let filename = files.choose(rng)?;
    let node_id = members.choose(rng)?;
    Some((filename.as_str(), node_id.as_str()))
}

/// Random relocation loop
pub struct AntiEntropy {
    ctx: Arc<NodeContext>,
    client: TransferClient,
    rng: Mutex<StdRng>,
}

impl AntiEntropy {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self::with_rng(ctx, StdRng::from_entropy())
    }

    /// Use a fixed seed, for reproducible picks
    pub fn with_seed(ctx: Arc<NodeContext>, seed: u64) -> Self {
        Self::with_rng(ctx, StdRng::seed_from_u64(seed))
    }

    fn with_rng(ctx: Arc<NodeContext>, rng: StdRng) -> Self {
        let client = TransferClient::new(Arc::clone(&ctx));
        Self {
            ctx,
            client,
            rng: Mutex::new(rng),
        }
    }

    /// Sleep one interval, then run a round, until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let interval = self.ctx.config.file_send_interval();
        info!("Anti-entropy loop started (every {:?})", interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => break,
            }

            match self.run_once().await {
                Ok(GossipOutcome::EmptyDirectory) => debug!("No files available to send"),
                Ok(GossipOutcome::SelectedSelf { filename }) => {
                    debug!("Selected self for {}, skipping", filename)
                }
                Ok(GossipOutcome::Relocated { .. }) => {}
                Err(e) => {
                    self.ctx.metrics.record_error(&e);
                    warn!("Anti-entropy round failed: {}", e);
                }
            }
        }

        info!("Anti-entropy loop stopped");
    }

    /// One round: pick a file and a member, relocate unless the member is us
    pub async fn run_once(&self) -> Result<GossipOutcome> {
        let files = self.ctx.store.list_files().await?;

        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            choose_pair(&files, self.ctx.placement.members(), &mut *rng)
                .map(|(f, n)| (f.to_string(), n.to_string()))
        };
        let Some((filename, node_id)) = picked else {
            return Ok(GossipOutcome::EmptyDirectory);
        };

        if node_id == self.ctx.node_id() {
            return Ok(GossipOutcome::SelectedSelf { filename });
        }

        let bytes = self.client.send_file(&node_id, &filename, true).await?;
        SyncMetrics::incr(&self.ctx.metrics.relocations);
        info!("Relocated {} to {}", filename, node_id);

        Ok(GossipOutcome::Relocated {
            filename,
            node_id,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::start_cluster;

    #[test]
    fn test_choose_pair() {
        let mut rng = StdRng::seed_from_u64(7);
        let files = vec!["a.txt".to_string(), "b.txt".to_string()];
        let members = vec!["node1".to_string()];

        assert!(choose_pair(&[], &members, &mut rng).is_none());

        for _ in 0..20 {
            let (file, node) = choose_pair(&files, &members, &mut rng).unwrap();
            assert!(files.iter().any(|f| f == file));
            assert_eq!(node, "node1");
        }
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let cluster = start_cluster(&["node1", "node2"], 1).await;
        let gossip = AntiEntropy::with_seed(Arc::clone(&cluster[0].ctx), 1);

        assert_eq!(gossip.run_once().await.unwrap(), GossipOutcome::EmptyDirectory);
    }

    #[tokio::test]
    async fn test_single_member_keeps_file() {
        let cluster = start_cluster(&["solo"], 1).await;
        cluster[0].write("alone.txt", b"stay");
        let gossip = AntiEntropy::with_seed(Arc::clone(&cluster[0].ctx), 3);

        for _ in 0..5 {
            assert_eq!(
                gossip.run_once().await.unwrap(),
                GossipOutcome::SelectedSelf {
                    filename: "alone.txt".to_string()
                }
            );
        }
        assert_eq!(cluster[0].read("alone.txt").unwrap(), b"stay");
    }

    #[tokio::test]
    async fn test_relocation_moves_file() {
        let cluster = start_cluster(&["node1", "node2"], 1).await;
        cluster[0].write("wander.bin", &[9u8; 4096]);
        let gossip = AntiEntropy::with_seed(Arc::clone(&cluster[0].ctx), 42);

        let mut relocated = None;
        for _ in 0..64 {
            match gossip.run_once().await.unwrap() {
                GossipOutcome::SelectedSelf { .. } => {
                    assert!(cluster[0].read("wander.bin").is_some());
                }
                outcome => {
                    relocated = Some(outcome);
                    break;
                }
            }
        }

        assert_eq!(
            relocated,
            Some(GossipOutcome::Relocated {
                filename: "wander.bin".to_string(),
                node_id: "node2".to_string(),
                bytes: 4096,
            })
        );
        assert!(cluster[0].read("wander.bin").is_none());
        assert_eq!(cluster[1].read("wander.bin").unwrap(), vec![9u8; 4096]);
        assert_eq!(cluster[0].ctx.metrics.snapshot().relocations, 1);
        assert_eq!(gossip.run_once().await.unwrap(), GossipOutcome::EmptyDirectory);
    }
}
