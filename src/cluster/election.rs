//! Leader Election
//!
//! Replicas compete for a single named lease in the coordination store.
//! Acquisition and renewal are compare-and-swap writes, so at most one
//! identity holds the lease per epoch. Leadership is published on a watch
//! channel; the distributor reacts to it, this loop never runs leader work
//! itself.

use super::store::CoordinationStore;
use super::types::LeaseState;

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy)]
pub struct LeaseConfig {
    pub lease_duration: Duration,
    /// How long renewal may keep failing before the holder steps down.
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

pub struct LeaderElection {
    store: Arc<dyn CoordinationStore>,
    lease_name: String,
    identity: String,
    config: LeaseConfig,
    leader_tx: watch::Sender<bool>,
}

impl LeaderElection {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        lease_name: String,
        identity: String,
        config: LeaseConfig,
    ) -> Arc<Self> {
        let (leader_tx, _) = watch::channel(false);
        Arc::new(LeaderElection {
            store,
            lease_name,
            identity,
            config,
            leader_tx,
        })
    }

    /// Leadership signal: `true` while this replica holds the lease.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Candidacy loop. Runs until the shutdown signal flips; leadership is
    /// relinquished (locally) on the way out.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "joining election for {} as {}",
            self.lease_name,
            self.identity
        );

        let mut interval = tokio::time::interval(self.config.retry_period);
        let mut last_renew = Instant::now();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {}
            }

            if !self.is_leader() {
                match self.try_acquire().await {
                    Ok(true) => {
                        tracing::info!("{} acquired lease {}", self.identity, self.lease_name);
                        last_renew = Instant::now();
                        self.leader_tx.send_replace(true);
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("lease acquisition failed: {}", e),
                }
                continue;
            }

            match self.renew().await {
                Ok(true) => last_renew = Instant::now(),
                Ok(false) => {
                    tracing::info!("{} lost lease {}", self.identity, self.lease_name);
                    self.leader_tx.send_replace(false);
                }
                Err(e) => {
                    tracing::warn!("lease renewal failed: {}", e);
                    if last_renew.elapsed() > self.config.renew_deadline {
                        tracing::info!(
                            "renew deadline exceeded, {} stepping down from {}",
                            self.identity,
                            self.lease_name
                        );
                        self.leader_tx.send_replace(false);
                    }
                }
            }
        }

        self.leader_tx.send_replace(false);
        tracing::info!("{} left election for {}", self.identity, self.lease_name);
    }

    /// One acquisition attempt: create the lease if absent, otherwise take
    /// it over when the current holder's renewals have lapsed.
    pub async fn try_acquire(&self) -> anyhow::Result<bool> {
        let now = Utc::now();
        let duration_secs = self.config.lease_duration.as_secs();

        match self.store.get_lease(&self.lease_name).await? {
            None => {
                let lease = LeaseState::new(&self.identity, duration_secs, now);
                self.store.create_lease(&self.lease_name, &lease).await
            }
            Some(current) if current.holder == self.identity => {
                // e.g. restart before expiry: re-adopt our own lease
                let mut lease = current.clone();
                lease.renew_time = now;
                self.store
                    .update_lease(&self.lease_name, &lease, &current.resource_version)
                    .await
            }
            Some(current) if current.is_expired(now) => {
                let mut lease = LeaseState::new(&self.identity, duration_secs, now);
                lease.acquire_seq = current.acquire_seq + 1;
                self.store
                    .update_lease(&self.lease_name, &lease, &current.resource_version)
                    .await
            }
            Some(_) => Ok(false),
        }
    }

    /// One renewal attempt. `Ok(false)` means the lease is positively held
    /// by someone else; a CAS conflict reads as an error so the deadline
    /// logic decides.
    async fn renew(&self) -> anyhow::Result<bool> {
        let current = match self.store.get_lease(&self.lease_name).await? {
            Some(current) => current,
            None => return Ok(false),
        };

        if current.holder != self.identity {
            return Ok(false);
        }

        let mut lease = current.clone();
        lease.renew_time = Utc::now();
        if self
            .store
            .update_lease(&self.lease_name, &lease, &current.resource_version)
            .await?
        {
            Ok(true)
        } else {
            anyhow::bail!("renewal hit a version conflict")
        }
    }
}
