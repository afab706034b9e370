//! Illumio PCE adapter: container clusters, labels and workload profiles
//!
//! Speaks the PCE REST API under `/api/{version}/orgs/{org_id}/`. Hrefs returned
//! by the PCE (`/orgs/1/container_clusters/<id>`) are addressed as
//! `/api/{version}{href}`.

pub mod models;

pub use models::{
    ClusterToken, ClusterUpdate, ContainerCluster, EnforcementMode, Label, LabelRef, NewCluster,
    WorkloadProfile,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{
    BackendClient, BackendError, BackendRequest, HttpAuth, HttpBackendClient, HttpClientConfig,
};
use crate::config::PceSettings;
use crate::retry::{retry_with_backoff, RetryPolicy};

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait PceApi: Send + Sync {
    /// Cluster with exactly this name, if any
    async fn find_cluster(&self, name: &str) -> Result<Option<ContainerCluster>, BackendError>;

    async fn list_clusters(&self) -> Result<Vec<ContainerCluster>, BackendError>;

    /// The returned cluster carries the one-time pairing token
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<ContainerCluster, BackendError>;

    async fn update_cluster(&self, href: &str, update: &ClusterUpdate) -> Result<(), BackendError>;

    async fn delete_cluster(&self, href: &str) -> Result<(), BackendError>;

    async fn find_label(&self, key: &str, value: &str) -> Result<Option<Label>, BackendError>;

    /// Fails with `Conflict` when the key/value pair already exists
    async fn create_label(&self, key: &str, value: &str) -> Result<Label, BackendError>;

    async fn create_workload_profile(
        &self,
        cluster_href: &str,
        profile: &WorkloadProfile,
    ) -> Result<WorkloadProfile, BackendError>;
}

// ============================================================================
// SBIO: I/O implementation
// ============================================================================

pub struct PceAdapter {
    client: Arc<dyn BackendClient>,
    org_id: u64,
    api_version: String,
    retry: RetryPolicy,
}

impl PceAdapter {
    pub fn new(client: Arc<dyn BackendClient>, org_id: u64) -> Self {
        Self {
            client,
            org_id,
            api_version: "v2".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_settings(settings: &PceSettings) -> Result<Self, BackendError> {
        let auth = match (&settings.api_user, &settings.api_key) {
            (Some(user), Some(key)) => HttpAuth::Basic {
                username: user.clone(),
                password: key.expose().to_string(),
            },
            _ => HttpAuth::None,
        };
        let client = HttpBackendClient::new(
            HttpClientConfig::new(&settings.base_url)
                .with_timeout(settings.timeout)
                .with_tls_verify(settings.verify_ssl)
                .with_auth(auth),
        )?;

        Ok(Self::new(Arc::new(client), settings.org_id)
            .with_api_version(&settings.api_version)
            .with_retry(settings.retry.policy()))
    }

    fn collection(&self, resource: &str) -> String {
        format!("/api/{}/orgs/{}/{}", self.api_version, self.org_id, resource)
    }

    fn href_path(&self, href: &str) -> String {
        format!("/api/{}{}", self.api_version, href)
    }

    async fn call(
        &self,
        operation: &str,
        request: BackendRequest,
    ) -> Result<Option<Value>, BackendError> {
        let client = &self.client;
        let request = &request;
        retry_with_backoff(&self.retry, operation, || async move {
            client.execute(request).await
        })
        .await
    }
}

fn decode<T: DeserializeOwned>(value: Option<Value>, what: &str) -> Result<T, BackendError> {
    let value = value.ok_or_else(|| BackendError::Decode(format!("empty {} response", what)))?;
    serde_json::from_value(value).map_err(|e| BackendError::Decode(format!("{}: {}", what, e)))
}

/// The PCE answers duplicate label creation with 406 instead of 409.
fn duplicate_as_conflict(err: BackendError) -> BackendError {
    match err {
        BackendError::Rejected { status: 406, message }
            if message.contains("already") || message.contains("in_use") =>
        {
            BackendError::Conflict(message)
        }
        other => other,
    }
}

#[async_trait]
impl PceApi for PceAdapter {
    async fn find_cluster(&self, name: &str) -> Result<Option<ContainerCluster>, BackendError> {
        // name= is a substring match on the PCE side
        let request =
            BackendRequest::get(self.collection("container_clusters")).with_query("name", name);
        let clusters: Vec<ContainerCluster> = match self.call("pce.find_cluster", request).await? {
            Some(body) => decode(Some(body), "container_clusters")?,
            None => return Ok(None),
        };
        Ok(clusters.into_iter().find(|c| c.name == name))
    }

    async fn list_clusters(&self) -> Result<Vec<ContainerCluster>, BackendError> {
        let request = BackendRequest::get(self.collection("container_clusters"));
        match self.call("pce.list_clusters", request).await? {
            Some(value) => decode(Some(value), "container_clusters"),
            None => Ok(Vec::new()),
        }
    }

    async fn create_cluster(&self, cluster: &NewCluster) -> Result<ContainerCluster, BackendError> {
        let body = serde_json::to_value(cluster).map_err(|e| BackendError::Client(e.to_string()))?;
        let request = BackendRequest::post(self.collection("container_clusters"), body);
        let created: ContainerCluster =
            decode(self.call("pce.create_cluster", request).await?, "container_cluster")?;
        debug!(href = %created.href, "PCE returned new container cluster");
        Ok(created)
    }

    async fn update_cluster(&self, href: &str, update: &ClusterUpdate) -> Result<(), BackendError> {
        let body = serde_json::to_value(update).map_err(|e| BackendError::Client(e.to_string()))?;
        let request = BackendRequest::put(self.href_path(href), body);
        self.call("pce.update_cluster", request).await?;
        Ok(())
    }

    async fn delete_cluster(&self, href: &str) -> Result<(), BackendError> {
        let request = BackendRequest::delete(self.href_path(href));
        self.call("pce.delete_cluster", request).await?;
        Ok(())
    }

    async fn find_label(&self, key: &str, value: &str) -> Result<Option<Label>, BackendError> {
        let request = BackendRequest::get(self.collection("labels"))
            .with_query("key", key)
            .with_query("value", value);
        let labels: Vec<Label> = match self.call("pce.find_label", request).await? {
            Some(body) => decode(Some(body), "labels")?,
            None => Vec::new(),
        };
        Ok(labels.into_iter().find(|l| l.key == key && l.value == value))
    }

    async fn create_label(&self, key: &str, value: &str) -> Result<Label, BackendError> {
        let body = json!({"key": key, "value": value});
        let request = BackendRequest::post(self.collection("labels"), body);
        let body = self
            .call("pce.create_label", request)
            .await
            .map_err(duplicate_as_conflict)?;
        decode(body, "label")
    }

    async fn create_workload_profile(
        &self,
        cluster_href: &str,
        profile: &WorkloadProfile,
    ) -> Result<WorkloadProfile, BackendError> {
        let body = serde_json::to_value(profile).map_err(|e| BackendError::Client(e.to_string()))?;
        let path = format!("{}/container_workload_profiles", self.href_path(cluster_href));
        let request = BackendRequest::post(path, body);
        decode(
            self.call("pce.create_workload_profile", request).await?,
            "container_workload_profile",
        )
    }
}
