//! Task Distributor (leader role)
//!
//! While this replica holds the lease it periodically enumerates the
//! configured task set and publishes one claim per task, addressed
//! round-robin to the running followers. The leader never executes tasks.
//! Each round also garbage-collects claims processed more than the
//! retention window ago.

use super::store::CoordinationStore;
use super::types::{ClaimRecord, DistributedTask, CLAIM_SELECTOR};
use crate::pipeline::types::WorkKind;
use crate::server::params;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DISTRIBUTION_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const PROCESSED_CLAIM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Selector for the replicas of this deployment.
const REPLICA_SELECTOR: &str = "project=mcall";

pub struct TaskDistributor {
    store: Arc<dyn CoordinationStore>,
    identity: String,
    /// The configured batch descriptor (`request.input` JSON).
    descriptor: String,
    default_kind: WorkKind,
    default_name: String,
    interval: Duration,
    claim_ttl: chrono::Duration,
}

impl TaskDistributor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: String,
        descriptor: String,
        default_kind: WorkKind,
        default_name: String,
    ) -> Arc<Self> {
        Arc::new(TaskDistributor {
            store,
            identity,
            descriptor,
            default_kind,
            default_name,
            interval: DISTRIBUTION_INTERVAL,
            claim_ttl: chrono::Duration::from_std(PROCESSED_CLAIM_TTL)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        })
    }

    /// Distribution loop: on becoming leader emit the full task set once,
    /// then every interval until leadership or the process goes away.
    pub async fn run(
        self: Arc<Self>,
        mut is_leader: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            // wait for leadership
            while !*is_leader.borrow() {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    changed = is_leader.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            tracing::info!("{} running as leader, starting task distribution", self.identity);
            if let Err(e) = self.distribute_round().await {
                tracing::error!("task distribution failed: {}", e);
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // immediate tick already handled above

            // tick while leader
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    changed = is_leader.changed() => {
                        if changed.is_err() || !*is_leader.borrow() {
                            tracing::info!("{} no longer leader, stopping distribution", self.identity);
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.distribute_round().await {
                            tracing::error!("task distribution failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// One distribution round: discover followers, enumerate tasks, emit a
    /// claim per task, and reap expired processed claims. Claim-create
    /// failures are logged and skipped; the round keeps going.
    pub async fn distribute_round(&self) -> Result<()> {
        if let Err(e) = self.collect_processed_claims().await {
            tracing::warn!("claim retention sweep failed: {}", e);
        }

        let tasks = self.generate_tasks()?;
        if tasks.is_empty() {
            tracing::info!("no tasks configured, nothing to distribute");
            return Ok(());
        }

        let followers = self.followers().await?;
        tracing::info!(
            "distributing {} task(s) across {} follower(s)",
            tasks.len(),
            followers.len()
        );

        if followers.is_empty() {
            tracing::warn!("no running followers, tasks not assigned this round");
            return Ok(());
        }

        let now = Utc::now();
        for (index, task) in tasks.iter().enumerate() {
            let follower = &followers[index % followers.len()];
            let claim = match ClaimRecord::for_task(follower, task, now) {
                Ok(claim) => claim,
                Err(e) => {
                    tracing::error!("failed to build claim for {}: {}", task.id, e);
                    continue;
                }
            };

            match self.store.create_claim(&claim).await {
                Ok(()) => {
                    tracing::info!("assigned {} to {} as {}", task.id, follower, claim.id)
                }
                Err(e) => tracing::warn!("failed to assign {} to {}: {}", task.id, follower, e),
            }
        }

        Ok(())
    }

    /// Parses the configured descriptor into the stable task list:
    /// `task-1..task-N` in descriptor order.
    pub fn generate_tasks(&self) -> Result<Vec<DistributedTask>> {
        if self.descriptor.is_empty() {
            return Ok(Vec::new());
        }

        let items =
            params::parse_descriptor(&self.descriptor, self.default_kind, &self.default_name)?;

        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, item)| DistributedTask {
                id: format!("task-{}", index + 1),
                item,
            })
            .collect())
    }

    /// Running replicas other than this one, in stable name order.
    async fn followers(&self) -> Result<Vec<String>> {
        let replicas = self.store.list_replicas(REPLICA_SELECTOR).await?;
        let mut followers: Vec<String> = replicas
            .into_iter()
            .filter(|replica| replica.is_running() && replica.name != self.identity)
            .map(|replica| replica.name)
            .collect();
        followers.sort();
        Ok(followers)
    }

    /// Deletes claims whose `processed-at` is past the retention window.
    /// Claims never get cleaned up otherwise, and a long-lived deployment
    /// accumulates one per task per round.
    async fn collect_processed_claims(&self) -> Result<()> {
        let cutoff = Utc::now() - self.claim_ttl;
        let claims = self.store.list_claims(CLAIM_SELECTOR).await?;

        for claim in claims {
            if !claim.is_processed() {
                continue;
            }
            let Some(processed_at) = claim.processed_at() else {
                continue;
            };
            if processed_at < cutoff {
                match self.store.delete_claim(&claim.id).await {
                    Ok(()) => tracing::debug!("reaped processed claim {}", claim.id),
                    Err(e) => tracing::warn!("failed to reap claim {}: {}", claim.id, e),
                }
            }
        }

        Ok(())
    }
}
