//! Distributed Task Overlay
//!
//! Multiple replicas coordinate through a compare-and-swap store so that
//! exactly one of them generates tasks while the rest execute them.
//!
//! ## Architecture Overview
//! 1. **Election**: every replica competes for one named lease
//!    (15s duration, 2s retry). The holder is the leader for that epoch.
//! 2. **Distribution**: the leader enumerates the configured task set and
//!    publishes one claim per task, addressed round-robin to the running
//!    followers. It re-emits the set every five minutes.
//! 3. **Execution**: every replica (leader-candidacy aside) polls for
//!    claims addressed to it, takes each with a CAS on the `in-progress`
//!    annotation, runs it through the batch path, and commits `processed*`.
//! 4. **Retention**: processed claims older than 24 hours are reaped by
//!    the leader's rounds; nothing else deletes claims.
//!
//! ## Submodules
//! - **`types`**: claims, the lease, replica info, label/annotation names.
//! - **`store`**: the [`store::CoordinationStore`] trait and the in-memory
//!   implementation.
//! - **`kube`**: the Kubernetes REST implementation (Leases + ConfigMaps +
//!   Pods) used in-cluster.
//! - **`election`**: lease acquisition/renewal publishing a leadership
//!   watch.
//! - **`distributor`**: the leader role.
//! - **`worker`**: the follower role.

pub mod distributor;
pub mod election;
pub mod kube;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;

use crate::config::{self, Config, Context};
use crate::pipeline::types::WorkKind;
use crate::server::shutdown_signal;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// Runs the distributed overlay until a termination signal: candidacy,
/// leader distribution, and the follower loop all in parallel.
pub async fn run_distributed(
    ctx: Arc<Context>,
    config: &Config,
    store: Arc<dyn store::CoordinationStore>,
) -> Result<()> {
    let identity = config::replica_identity();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let election = election::LeaderElection::new(
        store.clone(),
        types::lease_name(),
        identity.clone(),
        election::LeaseConfig::default(),
    );
    let is_leader = election.subscribe();

    let task_name = if config.request.name.is_empty() {
        config.request.subject.clone()
    } else {
        config.request.name.clone()
    };
    let distributor = distributor::TaskDistributor::new(
        store.clone(),
        identity.clone(),
        config.request.input.clone(),
        WorkKind::from_flag(&config.request.kind),
        task_name,
    );
    let task_worker = worker::TaskWorker::new(store, ctx, identity);

    let election_handle = tokio::spawn(election.run(shutdown_rx.clone()));
    let distributor_handle = tokio::spawn(distributor.run(is_leader, shutdown_rx.clone()));
    let worker_handle = tokio::spawn(task_worker.run(shutdown_rx));

    shutdown_signal().await;
    shutdown_tx.send_replace(true);

    for handle in [election_handle, distributor_handle, worker_handle] {
        if let Err(e) = handle.await {
            tracing::warn!("overlay task join failed: {}", e);
        }
    }

    Ok(())
}
