//! Kubernetes side of a cluster: namespace, token Secret and ServiceAccount

pub mod kubernetes;

pub use kubernetes::KubeRuntime;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::backend::BackendError;

/// Marks objects this tool created
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "illumio-cluster-manager";
/// Names the PCE container cluster an object belongs to
pub const CLUSTER_LABEL: &str = "illumio.com/container-cluster";

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// Name and labels of an existing Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl ObjectInfo {
    /// Created by this tool on behalf of `cluster`
    pub fn is_owned_by(&self, cluster: &str) -> bool {
        self.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
            && self.labels.get(CLUSTER_LABEL).map(String::as_str) == Some(cluster)
    }
}

/// Labels stamped on every object created for `cluster`
pub fn ownership_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (CLUSTER_LABEL.to_string(), cluster.to_string()),
    ])
}

/// Name of the Secret holding the pairing token for a service account
pub fn token_secret_name(service_account: &str) -> String {
    format!("{}-token", service_account)
}

/// Where a provisioned cluster lives inside Kubernetes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceBinding {
    pub namespace: String,
    pub service_account: String,
    pub secret_name: String,
    pub cluster_href: String,
    /// False when an existing namespace was adopted
    pub namespace_created: bool,
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Creates fail with `Conflict` when the object exists; deletes fail with
/// `NotFound` when it does not.
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<ObjectInfo>, BackendError>;

    async fn create_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), BackendError>;

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError>;

    /// The account references `secret_name` as its token secret
    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        secret_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError>;

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<(), BackendError>;

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError>;

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
}
