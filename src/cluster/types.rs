use crate::pipeline::types::WorkItem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROJECT_LABEL: &str = "project";
pub const PROJECT_NAME: &str = "mcall";
pub const TASK_LABEL: &str = "task";
pub const ASSIGNED_TO_LABEL: &str = "assigned-to";

pub const TASK_DATA_ANNOTATION: &str = "task-data";
pub const IN_PROGRESS_ANNOTATION: &str = "in-progress";
pub const PROCESSED_ANNOTATION: &str = "processed";
pub const PROCESSED_AT_ANNOTATION: &str = "processed-at";
pub const PROCESSED_BY_ANNOTATION: &str = "processed-by";

/// Label selector matching every claim of this deployment.
pub const CLAIM_SELECTOR: &str = "project=mcall,task=true";

/// One task as serialized into a claim's `task-data` annotation: the work
/// item plus the stable `task-<index>` id the leader assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedTask {
    pub id: String,
    #[serde(flatten)]
    pub item: WorkItem,
}

/// A coordination-store object addressing one task to one follower.
///
/// The leader creates claims; followers flip the `in-progress` and
/// `processed*` annotations. `resource_version` is the store's optimistic
/// concurrency token and changes on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRecord {
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub resource_version: String,
}

impl ClaimRecord {
    /// Builds the claim the leader emits for `task` addressed to `follower`.
    /// The id is `task-<follower>-<unix-seconds>` per the claim naming
    /// scheme; a same-second collision surfaces as a create conflict that
    /// the leader logs and skips, and the next round re-emits the task.
    pub fn for_task(
        follower: &str,
        task: &DistributedTask,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ClaimRecord> {
        let mut labels = BTreeMap::new();
        labels.insert(PROJECT_LABEL.to_string(), PROJECT_NAME.to_string());
        labels.insert(TASK_LABEL.to_string(), "true".to_string());
        labels.insert(ASSIGNED_TO_LABEL.to_string(), follower.to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(
            TASK_DATA_ANNOTATION.to_string(),
            serde_json::to_string(task)?,
        );

        Ok(ClaimRecord {
            id: format!("task-{}-{}", follower, now.timestamp()),
            labels,
            annotations,
            resource_version: String::new(),
        })
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_processed(&self) -> bool {
        self.annotation(PROCESSED_ANNOTATION) == Some("true")
    }

    pub fn is_in_progress(&self) -> bool {
        self.annotation(IN_PROGRESS_ANNOTATION) == Some("true")
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.annotation(PROCESSED_AT_ANNOTATION)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn task(&self) -> anyhow::Result<DistributedTask> {
        let raw = self
            .annotation(TASK_DATA_ANNOTATION)
            .ok_or_else(|| anyhow::anyhow!("claim {} has no task data", self.id))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Label-selector match in the `k=v,k=v` form the store APIs use.
    pub fn matches(&self, selector: &str) -> bool {
        parse_selector(selector)
            .iter()
            .all(|(key, value)| self.labels.get(key).map(String::as_str) == Some(value))
    }
}

/// The single named lease object: current holder, expiry bookkeeping, and a
/// monotonic acquire sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseState {
    pub holder: String,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub lease_duration_secs: u64,
    /// Incremented each time a different identity takes the lease.
    pub acquire_seq: u64,
    pub resource_version: String,
}

impl LeaseState {
    pub fn new(holder: &str, lease_duration_secs: u64, now: DateTime<Utc>) -> Self {
        LeaseState {
            holder: holder.to_string(),
            acquire_time: now,
            renew_time: now,
            lease_duration_secs,
            acquire_seq: 1,
            resource_version: String::new(),
        }
    }

    /// A lease is up for grabs once the holder has not renewed within the
    /// lease duration.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let deadline = self.renew_time + chrono::Duration::seconds(self.lease_duration_secs as i64);
        now > deadline
    }
}

/// One replica as seen through the coordination store (a labelled pod).
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaInfo {
    pub name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
}

impl ReplicaInfo {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    pub fn matches(&self, selector: &str) -> bool {
        parse_selector(selector)
            .iter()
            .all(|(key, value)| self.labels.get(key).map(String::as_str) == Some(value))
    }
}

pub fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// The deployment-wide lease name. A branch suffix comes from `GIT_BRANCH`
/// (with `GIT-BRANCH` accepted as a legacy spelling), underscores mapped to
/// hyphens for store object naming.
pub fn lease_name() -> String {
    let branch = std::env::var("GIT_BRANCH")
        .or_else(|_| std::env::var("GIT-BRANCH"))
        .unwrap_or_default();

    if branch.is_empty() {
        "mcall-leader".to_string()
    } else {
        format!("mcall-leader-{}", branch.replace('_', "-"))
    }
}
