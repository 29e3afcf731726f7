//! Coordination Store
//!
//! The seam between the distribution protocol and whatever consistent store
//! backs it. Everything the protocol needs is expressed here: lease
//! read/compare-and-swap, labelled replica listing, and claim CRUD with
//! optimistic concurrency. [`MemoryStore`] is the in-process
//! implementation used by tests and single-host runs; the Kubernetes REST
//! implementation lives in [`super::kube`].

use super::types::{ClaimRecord, LeaseState, ReplicaInfo};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get_lease(&self, name: &str) -> Result<Option<LeaseState>>;

    /// Creates the named lease. Returns `false` when it already exists.
    async fn create_lease(&self, name: &str, lease: &LeaseState) -> Result<bool>;

    /// Replaces the lease if `expected_version` still matches. Returns
    /// `false` on a version conflict.
    async fn update_lease(
        &self,
        name: &str,
        lease: &LeaseState,
        expected_version: &str,
    ) -> Result<bool>;

    /// Lists replicas matching a `k=v,k=v` label selector.
    async fn list_replicas(&self, label_selector: &str) -> Result<Vec<ReplicaInfo>>;

    /// Creates a claim; an existing claim with the same id is an error.
    async fn create_claim(&self, claim: &ClaimRecord) -> Result<()>;

    async fn list_claims(&self, label_selector: &str) -> Result<Vec<ClaimRecord>>;

    /// Replaces a claim if `expected_version` still matches. Returns the
    /// stored record (with its new version) or `None` on conflict.
    async fn update_claim(
        &self,
        claim: &ClaimRecord,
        expected_version: &str,
    ) -> Result<Option<ClaimRecord>>;

    /// Removes a claim; deleting a missing claim is not an error.
    async fn delete_claim(&self, id: &str) -> Result<()>;
}

/// Dashmap-backed store with the same compare-and-swap semantics as the
/// real one. Replicas are registered explicitly (`register_replica`).
#[derive(Default)]
pub struct MemoryStore {
    leases: DashMap<String, LeaseState>,
    claims: DashMap<String, ClaimRecord>,
    replicas: DashMap<String, ReplicaInfo>,
    version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    pub fn register_replica(&self, replica: ReplicaInfo) {
        self.replicas.insert(replica.name.clone(), replica);
    }

    pub fn remove_replica(&self, name: &str) {
        self.replicas.remove(name);
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_lease(&self, name: &str) -> Result<Option<LeaseState>> {
        Ok(self.leases.get(name).map(|lease| lease.clone()))
    }

    async fn create_lease(&self, name: &str, lease: &LeaseState) -> Result<bool> {
        match self.leases.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = lease.clone();
                stored.resource_version = self.next_version();
                slot.insert(stored);
                Ok(true)
            }
        }
    }

    async fn update_lease(
        &self,
        name: &str,
        lease: &LeaseState,
        expected_version: &str,
    ) -> Result<bool> {
        match self.leases.get_mut(name) {
            Some(mut current) => {
                if current.resource_version != expected_version {
                    return Ok(false);
                }
                let mut stored = lease.clone();
                stored.resource_version = self.next_version();
                *current = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_replicas(&self, label_selector: &str) -> Result<Vec<ReplicaInfo>> {
        let mut replicas: Vec<ReplicaInfo> = self
            .replicas
            .iter()
            .filter(|entry| entry.value().matches(label_selector))
            .map(|entry| entry.value().clone())
            .collect();
        replicas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(replicas)
    }

    async fn create_claim(&self, claim: &ClaimRecord) -> Result<()> {
        match self.claims.entry(claim.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                anyhow::bail!("claim {} already exists", claim.id)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = claim.clone();
                stored.resource_version = self.next_version();
                slot.insert(stored);
                Ok(())
            }
        }
    }

    async fn list_claims(&self, label_selector: &str) -> Result<Vec<ClaimRecord>> {
        let mut claims: Vec<ClaimRecord> = self
            .claims
            .iter()
            .filter(|entry| entry.value().matches(label_selector))
            .map(|entry| entry.value().clone())
            .collect();
        claims.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(claims)
    }

    async fn update_claim(
        &self,
        claim: &ClaimRecord,
        expected_version: &str,
    ) -> Result<Option<ClaimRecord>> {
        match self.claims.get_mut(&claim.id) {
            Some(mut current) => {
                if current.resource_version != expected_version {
                    return Ok(None);
                }
                let mut stored = claim.clone();
                stored.resource_version = self.next_version();
                *current = stored.clone();
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    async fn delete_claim(&self, id: &str) -> Result<()> {
        self.claims.remove(id);
        Ok(())
    }
}
