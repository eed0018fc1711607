//! Reconciliation
//!
//! Every cycle walks the local directory and, for each file:
//!
//! - not primary, but responsible: push the file to the primary;
//! - not responsible at all: push it to the whole responsible set and
//!   hand the local copy off;
//! - primary: pull every other replica into staging, compare digests
//!   against the local copy, repair replicas that are missing and keep
//!   diverging replicas side by side under a timestamped name.
//!
//! The live file is never overwritten by a pull, so the local version always
//! survives a conflict.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::SyncMetrics;
use crate::node::{NodeContext, ShutdownSignal};
use crate::store::conflict_name;
use crate::transfer::{FetchOutcome, TransferClient};

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Files examined
    pub files_checked: usize,
    /// Files pushed to their primary
    pub pushed: usize,
    /// Replicas found identical to the primary's copy
    pub consistent: usize,
    /// Replicas recreated on responsible nodes that lacked the file
    pub repaired: usize,
    /// Local copies handed off to the responsible set
    pub handed_off: usize,
    /// New conflicting copies kept
    pub conflicts: usize,
    /// Per-file or per-peer failures
    pub errors: usize,
}

/// Periodic convergence of local files onto their responsible nodes
pub struct Reconciler {
    ctx: Arc<NodeContext>,
    client: TransferClient,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        let client = TransferClient::new(Arc::clone(&ctx));
        Self { ctx, client }
    }

    /// Run cycles at the configured interval until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let interval = self.ctx.config.scheduler_interval();
        info!("Reconciliation loop started (every {:?})", interval);

        loop {
            info!("Starting file synchronization...");
            match self.run_cycle().await {
                Ok(report) => info!(
                    "Files synced: {} checked, {} pushed, {} consistent, {} repaired, {} handed off, {} conflicts, {} errors",
                    report.files_checked,
                    report.pushed,
                    report.consistent,
                    report.repaired,
                    report.handed_off,
                    report.conflicts,
                    report.errors
                ),
                Err(e) => {
                    self.ctx.metrics.record_error(&e);
                    error!("Reconciliation cycle failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => break,
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Reconcile every file currently in the local directory, one at a time
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for filename in self.ctx.store.list_files().await? {
            report.files_checked += 1;
            debug!("Checking file: {}", filename);

            if let Err(e) = self.sync_file(&filename, &mut report).await {
                if e.is_not_found() {
                    debug!("File {} disappeared during reconciliation", filename);
                    continue;
                }
                report.errors += 1;
                self.ctx.metrics.record_error(&e);
                warn!("Failed to reconcile {}: {}", filename, e);
            }
        }

        SyncMetrics::incr(&self.ctx.metrics.reconcile_cycles);
        Ok(report)
    }

    async fn sync_file(&self, filename: &str, report: &mut CycleReport) -> Result<()> {
        let me = self.ctx.node_id();
        let responsible = self.ctx.responsible(filename);
        let primary = responsible[0].as_str();
        debug!("Responsible nodes for {}: {:?}", filename, responsible);

        if primary == me {
            self.reconcile_as_primary(filename, &responsible, report).await;
            return Ok(());
        }

        if responsible.iter().any(|id| id == me) || !self.ctx.config.sync.handoff {
            debug!("Sending {} to primary {}", filename, primary);
            self.client.send_file(primary, filename, false).await?;
            report.pushed += 1;
            return Ok(());
        }

        self.hand_off(filename, &responsible, report).await
    }

    /// Push a file this node is not responsible for to its whole set, then drop it
    async fn hand_off(
        &self,
        filename: &str,
        responsible: &[String],
        report: &mut CycleReport,
    ) -> Result<()> {
        let digest = self.ctx.digest_of(filename).await?;

        let mut failed = 0;
        for node_id in responsible {
            match self.client.send_file(node_id, filename, false).await {
                Ok(_) => report.pushed += 1,
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    failed += 1;
                    report.errors += 1;
                    self.ctx.metrics.record_error(&e);
                    warn!("Failed to hand {} to {}: {}", filename, node_id, e);
                }
            }
        }

        if failed > 0 {
            info!("Keeping {} until all {} responsible nodes hold it", filename, responsible.len());
            return Ok(());
        }

        let _guard = self.ctx.locks.lock(filename).await;
        if self.ctx.digest_of(filename).await? != digest {
            info!("File {} changed while handing off, keeping it", filename);
            return Ok(());
        }

        self.ctx.store.remove(filename).await?;
        self.ctx.checksums.invalidate(&self.ctx.store.path_of(filename)?);
        SyncMetrics::incr(&self.ctx.metrics.handoffs);
        report.handed_off += 1;
        info!("Handed {} off to {:?}", filename, responsible);
        Ok(())
    }

    /// Pull each other replica in turn and compare it with the local copy
    async fn reconcile_as_primary(
        &self,
        filename: &str,
        responsible: &[String],
        report: &mut CycleReport,
    ) {
        let local_digest = match self.ctx.digest_of(filename).await {
            Ok(digest) => digest,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                report.errors += 1;
                self.ctx.metrics.record_error(&e);
                warn!("Cannot digest {}: {}", filename, e);
                return;
            }
        };

        for node_id in responsible.iter().filter(|id| *id != self.ctx.node_id()) {
            if let Err(e) = self.pull_and_compare(filename, node_id, &local_digest, report).await {
                if e.is_not_found() {
                    debug!("File {} disappeared during reconciliation", filename);
                    return;
                }
                report.errors += 1;
                self.ctx.metrics.record_error(&e);
                warn!("Failed to reconcile {} with {}: {}", filename, node_id, e);
            }
        }
    }

    async fn pull_and_compare(
        &self,
        filename: &str,
        node_id: &str,
        local_digest: &str,
        report: &mut CycleReport,
    ) -> Result<()> {
        let address = self.ctx.config.node_address(node_id)?;
        let staged = self.ctx.store.staging_path(filename);

        let outcome = match self.client.fetch_to(address, filename, &staged).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx.store.discard(&staged).await;
                return Err(e);
            }
        };

        match outcome {
            FetchOutcome::NotFound => {
                info!("Node {} lacks {}, sending a copy", node_id, filename);
                self.client.send_file(node_id, filename, false).await?;
                SyncMetrics::incr(&self.ctx.metrics.repairs);
                report.repaired += 1;
            }
            FetchOutcome::Fetched { digest, .. } if digest == local_digest => {
                self.ctx.store.discard(&staged).await;
                debug!("No conflict detected for {} on {}, file is consistent", filename, node_id);
                report.consistent += 1;
            }
            FetchOutcome::Fetched { digest, .. } => {
                warn!("Checksum mismatch for {} on node {}", filename, node_id);
                let kept = self
                    .keep_conflicting_copy(filename, &staged, &digest, local_digest)
                    .await;
                self.ctx.store.discard(&staged).await;
                if kept? {
                    report.conflicts += 1;
                }
            }
        }

        Ok(())
    }

    /// Store a diverging replica next to the local file.
    ///
    /// Returns whether a new conflict copy was created. The staged file is
    /// moved on success and left for the caller to discard otherwise.
    async fn keep_conflicting_copy(
        &self,
        filename: &str,
        staged: &Path,
        remote_digest: &str,
        local_digest: &str,
    ) -> Result<bool> {
        let _guard = self.ctx.locks.lock(filename).await;

        if self.ctx.digest_of(filename).await? != local_digest {
            info!("File {} changed during reconciliation, revisiting next cycle", filename);
            return Ok(false);
        }

        if self.ctx.conflicts.contains(filename, remote_digest) {
            debug!("Conflicting version of {} already kept", filename);
            return Ok(false);
        }

        for copy in self.ctx.store.conflict_copies(filename).await? {
            if self.ctx.digest_of(&copy).await? == remote_digest {
                self.ctx.conflicts.record(filename, remote_digest);
                debug!("Conflicting version of {} already kept as {}", filename, copy);
                return Ok(false);
            }
        }

        SyncMetrics::incr(&self.ctx.metrics.conflicts);
        let new_name = conflict_name(filename, chrono::Utc::now().timestamp());
        if self.ctx.store.commit_new(staged, &new_name).await? {
            self.ctx.conflicts.record(filename, remote_digest);
            info!("Conflicting copy of {} kept as {}", filename, new_name);
            Ok(true)
        } else {
            SyncMetrics::incr(&self.ctx.metrics.conflict_renames_skipped);
            warn!("File {} already exists, skipping rename", new_name);
            Ok(false)
        }
    }
}
