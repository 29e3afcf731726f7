//! Task Worker (follower role)
//!
//! Every replica polls the store for claims addressed to it, takes each one
//! with a compare-and-swap on the `in-progress` annotation, executes the
//! embedded work item through the single-item batch path, and commits the
//! `processed*` annotations. Any per-claim error is logged and the tick
//! moves on.

use super::store::CoordinationStore;
use super::types::{
    ASSIGNED_TO_LABEL, IN_PROGRESS_ANNOTATION, PROCESSED_ANNOTATION, PROCESSED_AT_ANNOTATION,
    PROCESSED_BY_ANNOTATION,
};
use crate::batch::orchestrator;
use crate::config::Context;
use crate::pipeline::types::Batch;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct TaskWorker {
    store: Arc<dyn CoordinationStore>,
    ctx: Arc<Context>,
    identity: String,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        ctx: Arc<Context>,
        identity: String,
    ) -> Arc<Self> {
        Arc::new(TaskWorker {
            store,
            ctx,
            identity,
        })
    }

    /// Follower loop: one processing pass per poll interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("{} monitoring for assigned tasks", self.identity);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_assigned().await {
                        tracing::error!("failed to process assigned tasks: {}", e);
                    }
                }
            }
        }

        tracing::info!("{} stopped task monitoring", self.identity);
    }

    /// One tick: list this replica's claims and execute every unprocessed
    /// one that the in-progress swap wins.
    pub async fn process_assigned(&self) -> Result<()> {
        let selector = format!(
            "project=mcall,task=true,{}={}",
            ASSIGNED_TO_LABEL, self.identity
        );
        let claims = self.store.list_claims(&selector).await?;
        tracing::debug!("found {} claim(s) for {}", claims.len(), self.identity);

        for claim in claims {
            if claim.is_processed() {
                tracing::debug!("claim {} already processed, skipping", claim.id);
                continue;
            }
            if claim.is_in_progress() {
                tracing::debug!("claim {} already executing, skipping", claim.id);
                continue;
            }

            // Take the claim before executing; a conflict means another
            // tick (or a stale listing) beat us to it.
            let mut marked = claim.clone();
            marked.annotations.insert(
                IN_PROGRESS_ANNOTATION.to_string(),
                "true".to_string(),
            );
            let owned = match self
                .store
                .update_claim(&marked, &claim.resource_version)
                .await
            {
                Ok(Some(owned)) => owned,
                Ok(None) => {
                    tracing::debug!("lost the race for claim {}", claim.id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("failed to take claim {}: {}", claim.id, e);
                    continue;
                }
            };

            match claim.task() {
                Ok(task) => {
                    tracing::info!("{} processing {}: {}", self.identity, task.id, task.item.input);
                    self.execute(&task.id, task.item.clone()).await;
                }
                Err(e) => {
                    // poisoned task data: commit it as processed so it is
                    // not retried forever and retention can reap it
                    tracing::error!("claim {} has unusable task data: {}", claim.id, e);
                }
            }

            if let Err(e) = self.mark_processed(owned).await {
                tracing::error!("failed to mark claim {} processed: {}", claim.id, e);
            }
        }

        Ok(())
    }

    /// Single-item batch execution; results are logged, never returned.
    async fn execute(&self, task_id: &str, item: crate::pipeline::types::WorkItem) {
        match orchestrator::run_batch(&self.ctx, Batch::new(vec![item])).await {
            Ok(records) => {
                for record in records {
                    tracing::info!(
                        "task {} result (errorCode={}): {}",
                        task_id,
                        record.error_code,
                        record.content.trim_end()
                    );
                }
            }
            Err(e) => tracing::error!("task {} execution failed: {}", task_id, e),
        }
    }

    async fn mark_processed(&self, mut claim: super::types::ClaimRecord) -> Result<()> {
        let version = claim.resource_version.clone();
        claim
            .annotations
            .insert(PROCESSED_ANNOTATION.to_string(), "true".to_string());
        claim.annotations.insert(
            PROCESSED_AT_ANNOTATION.to_string(),
            Utc::now().to_rfc3339(),
        );
        claim.annotations.insert(
            PROCESSED_BY_ANNOTATION.to_string(),
            self.identity.clone(),
        );

        match self.store.update_claim(&claim, &version).await? {
            Some(_) => {
                tracing::info!("claim {} completed and marked processed", claim.id);
                Ok(())
            }
            None => anyhow::bail!("processed commit conflicted"),
        }
    }
}
