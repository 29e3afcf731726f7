//! Kubernetes Coordination Store
//!
//! Implements [`CoordinationStore`] directly against the Kubernetes REST
//! API using the in-cluster service account: `coordination.k8s.io/v1`
//! Leases for the lease, `core/v1` ConfigMaps for claims, and `core/v1`
//! Pods for replica discovery. Optimistic concurrency rides on object
//! `resourceVersion`s; the API server answers a stale version with 409,
//! which maps to the trait's compare-and-swap failure.

use super::store::CoordinationStore;
use super::types::{ClaimRecord, LeaseState, ReplicaInfo};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_RETRIES: usize = 3;

/// Kubernetes MicroTime wire format.
const MICRO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub struct KubeStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    namespace: String,
}

impl KubeStore {
    /// Builds a store from the in-cluster environment: service host/port
    /// variables, the mounted service-account token, and the cluster CA.
    /// The namespace comes from `NAMESPACE`, falling back to the mounted
    /// namespace file, then `default`.
    pub fn from_cluster() -> Result<Arc<Self>> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .context("KUBERNETES_SERVICE_HOST is not set; not running in a cluster")?;
        let port =
            std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let token = std::fs::read_to_string(format!("{}/token", SERVICE_ACCOUNT_DIR))
            .context("failed to read service account token")?
            .trim()
            .to_string();

        let namespace = std::env::var("NAMESPACE").ok().unwrap_or_else(|| {
            std::fs::read_to_string(format!("{}/namespace", SERVICE_ACCOUNT_DIR))
                .map(|ns| ns.trim().to_string())
                .unwrap_or_else(|_| "default".to_string())
        });

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        match std::fs::read(format!("{}/ca.crt", SERVICE_ACCOUNT_DIR))
            .ok()
            .and_then(|pem| reqwest::Certificate::from_pem(&pem).ok())
        {
            Some(ca) => builder = builder.add_root_certificate(ca),
            None => {
                tracing::warn!("cluster CA unavailable, skipping API server verification");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(Arc::new(KubeStore {
            client: builder.build().context("failed to build kube client")?,
            base_url: format!("https://{}:{}", host, port),
            token,
            namespace,
        }))
    }

    fn lease_url(&self, name: &str) -> String {
        format!(
            "{}/apis/coordination.k8s.io/v1/namespaces/{}/leases/{}",
            self.base_url, self.namespace, name
        )
    }

    fn leases_url(&self) -> String {
        format!(
            "{}/apis/coordination.k8s.io/v1/namespaces/{}/leases",
            self.base_url, self.namespace
        )
    }

    fn configmaps_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps",
            self.base_url, self.namespace
        )
    }

    fn configmap_url(&self, name: &str) -> String {
        format!("{}/{}", self.configmaps_url(), name)
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace)
    }

    /// Listing is retried with jittered backoff; the tickers tolerate the
    /// latency and a transient API server blip should not waste a round.
    async fn get_with_retry(&self, url: &str, selector: Option<&str>) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..LIST_RETRIES {
            let mut request = self.client.get(url).bearer_auth(&self.token);
            if let Some(selector) = selector {
                request = request.query(&[("labelSelector", selector)]);
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt + 1 == LIST_RETRIES {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted"))
    }
}

// ---- wire objects -------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ObjectMeta {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LeaseSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    holder_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    acquire_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    renew_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_transitions: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LeaseObject {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    spec: LeaseSpec,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigMapObject {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigMapList {
    items: Vec<ConfigMapObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodStatus {
    phase: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodObject {
    metadata: ObjectMeta,
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodList {
    items: Vec<PodObject>,
}

fn parse_micro_time(raw: &Option<String>) -> DateTime<Utc> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn lease_from_object(object: LeaseObject) -> LeaseState {
    LeaseState {
        holder: object.spec.holder_identity.unwrap_or_default(),
        acquire_time: parse_micro_time(&object.spec.acquire_time),
        renew_time: parse_micro_time(&object.spec.renew_time),
        lease_duration_secs: object.spec.lease_duration_seconds.unwrap_or(0),
        acquire_seq: object.spec.lease_transitions.unwrap_or(0),
        resource_version: object.metadata.resource_version.unwrap_or_default(),
    }
}

impl KubeStore {
    fn lease_to_object(&self, name: &str, lease: &LeaseState, version: Option<&str>) -> LeaseObject {
        LeaseObject {
            api_version: "coordination.k8s.io/v1".to_string(),
            kind: "Lease".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some(self.namespace.clone()),
                resource_version: version.map(str::to_string),
                ..ObjectMeta::default()
            },
            spec: LeaseSpec {
                holder_identity: Some(lease.holder.clone()),
                lease_duration_seconds: Some(lease.lease_duration_secs),
                acquire_time: Some(lease.acquire_time.format(MICRO_TIME_FORMAT).to_string()),
                renew_time: Some(lease.renew_time.format(MICRO_TIME_FORMAT).to_string()),
                lease_transitions: Some(lease.acquire_seq),
            },
        }
    }

    fn claim_to_object(&self, claim: &ClaimRecord, version: Option<&str>) -> ConfigMapObject {
        ConfigMapObject {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata: ObjectMeta {
                name: claim.id.clone(),
                namespace: Some(self.namespace.clone()),
                labels: claim.labels.clone(),
                annotations: claim.annotations.clone(),
                resource_version: version.map(str::to_string),
            },
        }
    }
}

fn claim_from_object(object: ConfigMapObject) -> ClaimRecord {
    ClaimRecord {
        id: object.metadata.name,
        labels: object.metadata.labels,
        annotations: object.metadata.annotations,
        resource_version: object.metadata.resource_version.unwrap_or_default(),
    }
}

#[async_trait]
impl CoordinationStore for KubeStore {
    async fn get_lease(&self, name: &str) -> Result<Option<LeaseState>> {
        let response = self.get_with_retry(&self.lease_url(name), None).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("lease get failed: {}", response.status());
        }

        let object: LeaseObject = response.json().await?;
        Ok(Some(lease_from_object(object)))
    }

    async fn create_lease(&self, name: &str, lease: &LeaseState) -> Result<bool> {
        let body = self.lease_to_object(name, lease, None);
        let response = self
            .client
            .post(self.leases_url())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => anyhow::bail!("lease create failed: {}", status),
        }
    }

    async fn update_lease(
        &self,
        name: &str,
        lease: &LeaseState,
        expected_version: &str,
    ) -> Result<bool> {
        let body = self.lease_to_object(name, lease, Some(expected_version));
        let response = self
            .client
            .put(self.lease_url(name))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => anyhow::bail!("lease update failed: {}", status),
        }
    }

    async fn list_replicas(&self, label_selector: &str) -> Result<Vec<ReplicaInfo>> {
        let response = self
            .get_with_retry(&self.pods_url(), Some(label_selector))
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("pod list failed: {}", response.status());
        }

        let pods: PodList = response.json().await?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| ReplicaInfo {
                name: pod.metadata.name,
                phase: pod.status.phase,
                labels: pod.metadata.labels,
            })
            .collect())
    }

    async fn create_claim(&self, claim: &ClaimRecord) -> Result<()> {
        let body = self.claim_to_object(claim, None);
        let response = self
            .client
            .post(self.configmaps_url())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("claim create for {} failed: {}", claim.id, response.status());
        }
        Ok(())
    }

    async fn list_claims(&self, label_selector: &str) -> Result<Vec<ClaimRecord>> {
        let response = self
            .get_with_retry(&self.configmaps_url(), Some(label_selector))
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("claim list failed: {}", response.status());
        }

        let list: ConfigMapList = response.json().await?;
        Ok(list.items.into_iter().map(claim_from_object).collect())
    }

    async fn update_claim(
        &self,
        claim: &ClaimRecord,
        expected_version: &str,
    ) -> Result<Option<ClaimRecord>> {
        let body = self.claim_to_object(claim, Some(expected_version));
        let response = self
            .client
            .put(self.configmap_url(&claim.id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(None),
            status if status.is_success() => {
                let stored: ConfigMapObject = response.json().await?;
                Ok(Some(claim_from_object(stored)))
            }
            status => anyhow::bail!("claim update for {} failed: {}", claim.id, status),
        }
    }

    async fn delete_claim(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.configmap_url(id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        anyhow::bail!("claim delete for {} failed: {}", id, response.status())
    }
}
