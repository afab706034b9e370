use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use tracing::debug;

use super::{ClusterRuntime, ObjectInfo};
use crate::backend::BackendError;
use crate::config::KubernetesSettings;
use crate::retry::{retry_with_backoff, RetryPolicy};

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Map a kube client error onto the shared backend taxonomy
pub fn classify_kube_error(err: kube::Error) -> BackendError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => BackendError::NotFound(response.message),
            409 => BackendError::Conflict(response.message),
            401 | 403 => BackendError::Auth(response.message),
            408 | 429 | 500..=599 => BackendError::Transient(response.message),
            code => BackendError::Rejected {
                status: code,
                message: response.message,
            },
        },
        kube::Error::HyperError(e) => BackendError::Transient(e.to_string()),
        kube::Error::Service(e) => BackendError::Transient(e.to_string()),
        other => BackendError::Client(other.to_string()),
    }
}

fn object_info<K: Resource>(object: &K) -> ObjectInfo {
    let meta = object.meta();
    ObjectInfo {
        name: meta.name.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
    }
}

fn metadata(name: &str, namespace: Option<&str>, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

// ============================================================================
// SBIO: I/O implementation
// ============================================================================

pub struct KubeRuntime {
    client: Client,
    retry: RetryPolicy,
}

impl KubeRuntime {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Build a client from in-cluster config, an explicit kubeconfig, or the default one
    pub async fn connect(settings: &KubernetesSettings) -> Result<Self, BackendError> {
        let options = KubeConfigOptions {
            context: settings.context.clone(),
            ..Default::default()
        };

        let config = if settings.in_cluster {
            Config::incluster()
                .map_err(|e| BackendError::Client(format!("in-cluster config: {}", e)))?
        } else if let Some(path) = &settings.kubeconfig {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                BackendError::Client(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| BackendError::Client(format!("invalid kubeconfig: {}", e)))?
        } else {
            Config::from_kubeconfig(&options)
                .await
                .map_err(|e| BackendError::Client(format!("failed to load kubeconfig: {}", e)))?
        };

        let client = Client::try_from(config)
            .map_err(|e| BackendError::Client(format!("failed to create kube client: {}", e)))?;

        debug!(
            context = ?settings.context,
            in_cluster = settings.in_cluster,
            "Kubernetes client ready"
        );
        Ok(Self::new(client, settings.retry.policy()))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn service_accounts(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_info<K>(
    api: &Api<K>,
    name: &str,
    retry: &RetryPolicy,
    operation: &str,
) -> Result<Option<ObjectInfo>, BackendError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let object = retry_with_backoff(retry, operation, || async move {
        api.get_opt(name).await.map_err(classify_kube_error)
    })
    .await?;
    Ok(object.as_ref().map(object_info))
}

async fn create<K>(
    api: &Api<K>,
    object: &K,
    retry: &RetryPolicy,
    operation: &str,
) -> Result<(), BackendError>
where
    K: Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let params = PostParams::default();
    let params = &params;
    retry_with_backoff(retry, operation, || async move {
        api.create(params, object).await.map_err(classify_kube_error)
    })
    .await?;
    Ok(())
}

async fn delete<K>(
    api: &Api<K>,
    name: &str,
    retry: &RetryPolicy,
    operation: &str,
) -> Result<(), BackendError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let params = DeleteParams::default();
    let params = &params;
    retry_with_backoff(retry, operation, || async move {
        api.delete(name, params).await.map_err(classify_kube_error)
    })
    .await?;
    Ok(())
}

#[async_trait]
impl ClusterRuntime for KubeRuntime {
    async fn get_namespace(&self, name: &str) -> Result<Option<ObjectInfo>, BackendError> {
        get_info(&self.namespaces(), name, &self.retry, "kube.get_namespace").await
    }

    async fn create_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        let namespace = Namespace {
            metadata: metadata(name, None, labels),
            ..Default::default()
        };
        create(&self.namespaces(), &namespace, &self.retry, "kube.create_namespace").await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), BackendError> {
        delete(&self.namespaces(), name, &self.retry, "kube.delete_namespace").await
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError> {
        let api = self.service_accounts(namespace);
        get_info(&api, name, &self.retry, "kube.get_service_account").await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        secret_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        let account = ServiceAccount {
            metadata: metadata(name, Some(namespace), labels),
            secrets: Some(vec![ObjectReference {
                name: Some(secret_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let api = self.service_accounts(namespace);
        create(&api, &account, &self.retry, "kube.create_service_account").await
    }

    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        let api = self.service_accounts(namespace);
        delete(&api, name, &self.retry, "kube.delete_service_account").await
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError> {
        get_info(&self.secrets(namespace), name, &self.retry, "kube.get_secret").await
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        let secret = Secret {
            metadata: metadata(name, Some(namespace), labels),
            type_: Some("Opaque".to_string()),
            string_data: Some(data.clone()),
            ..Default::default()
        };
        create(&self.secrets(namespace), &secret, &self.retry, "kube.create_secret").await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        delete(&self.secrets(namespace), name, &self.retry, "kube.delete_secret").await
    }
}
