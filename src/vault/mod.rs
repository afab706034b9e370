//! HashiCorp Vault adapter (KV version 2 engine)
//!
//! Secrets live at `/v1/{mount}/data/{path}`; deleting goes through
//! `/v1/{mount}/metadata/{path}` so every version is removed.

pub mod auth;

pub use auth::{AuthMethod, VaultCredentials};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::{
    BackendClient, BackendError, BackendRequest, HttpBackendClient, HttpClientConfig,
};
use crate::config::{SecretValue, VaultSettings};
use crate::retry::{retry_with_backoff, RetryPolicy};

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// One version of a stored secret
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRecord {
    pub path: String,
    pub version: u64,
    pub data: Map<String, Value>,
    pub created_time: Option<DateTime<Utc>>,
}

fn parse_record(path: &str, body: &Value) -> Result<Option<SecretRecord>, BackendError> {
    let inner = body
        .get("data")
        .ok_or_else(|| BackendError::Decode("secret response has no data block".to_string()))?;

    // soft-deleted or destroyed versions come back with null data
    let Some(data) = inner.get("data").and_then(Value::as_object) else {
        return Ok(None);
    };

    let metadata = inner.get("metadata");
    let version = metadata
        .and_then(|m| m.get("version"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let created_time = metadata
        .and_then(|m| m.get("created_time"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(Some(SecretRecord {
        path: path.to_string(),
        version,
        data: data.clone(),
        created_time,
    }))
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Latest version when `version` is `None`; `Ok(None)` when nothing is stored
    async fn read_secret(
        &self,
        path: &str,
        version: Option<u64>,
    ) -> Result<Option<SecretRecord>, BackendError>;

    /// Write a new version and return its number. With `cas: Some(0)` the write
    /// only succeeds if the path holds nothing yet; a mismatch is a `Conflict`.
    async fn write_secret(
        &self,
        path: &str,
        data: &Map<String, Value>,
        cas: Option<u64>,
    ) -> Result<u64, BackendError>;

    /// Remove the secret and all of its versions
    async fn delete_secret(&self, path: &str) -> Result<(), BackendError>;

    /// Child keys under `prefix`; folders end with `/`
    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>, BackendError>;
}

// ============================================================================
// SBIO: I/O implementation
// ============================================================================

pub struct VaultAdapter {
    client: Arc<dyn BackendClient>,
    auth: AuthMethod,
    mount_point: String,
    namespace: Option<String>,
    retry: RetryPolicy,
    credentials: RwLock<Option<VaultCredentials>>,
}

impl VaultAdapter {
    pub fn new(client: Arc<dyn BackendClient>, auth: AuthMethod) -> Self {
        Self {
            client,
            auth,
            mount_point: "secret".to_string(),
            namespace: None,
            retry: RetryPolicy::default(),
            credentials: RwLock::new(None),
        }
    }

    pub fn with_mount_point(mut self, mount: impl Into<String>) -> Self {
        self.mount_point = mount.into().trim_matches('/').to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_settings(settings: &VaultSettings) -> Result<Self, BackendError> {
        let mut config = HttpClientConfig::new(&settings.address)
            .with_timeout(settings.timeout)
            .with_tls_verify(settings.tls.verify);
        config.ca_cert = settings.tls.ca_cert.clone();
        if let (Some(cert), Some(key)) = (&settings.tls.client_cert, &settings.tls.client_key) {
            config.client_identity = Some((cert.clone(), key.clone()));
        }
        let client = HttpBackendClient::new(config)?;

        Ok(Self::new(Arc::new(client), settings.auth.clone())
            .with_mount_point(&settings.mount_point)
            .with_namespace(settings.namespace.clone())
            .with_retry(settings.retry.policy()))
    }

    fn data_path(&self, path: &str) -> String {
        format!("/v1/{}/data/{}", self.mount_point, path.trim_matches('/'))
    }

    fn metadata_path(&self, path: &str) -> String {
        format!("/v1/{}/metadata/{}", self.mount_point, path.trim_matches('/'))
    }

    /// Cached client token, logging in on first use
    async fn token(&self) -> Result<SecretValue, BackendError> {
        if let Some(creds) = self.credentials.read().await.as_ref() {
            return Ok(creds.token.clone());
        }

        let mut guard = self.credentials.write().await;
        if let Some(creds) = guard.as_ref() {
            return Ok(creds.token.clone());
        }

        let auth = &self.auth;
        let client = self.client.as_ref();
        let namespace = self.namespace.as_deref();
        let creds = retry_with_backoff(&self.retry, "vault.login", || async move {
            auth.authenticate(client, namespace).await
        })
        .await?;

        info!(
            method = self.auth.name(),
            lease_seconds = creds.lease_duration,
            "Authenticated to Vault"
        );
        let token = creds.token.clone();
        *guard = Some(creds);
        Ok(token)
    }

    async fn call(
        &self,
        operation: &str,
        request: BackendRequest,
    ) -> Result<Option<Value>, BackendError> {
        match self.call_once(operation, &request).await {
            Err(BackendError::Auth(_)) if self.auth.can_reauthenticate() => {
                warn!(operation = %operation, "Vault token rejected, logging in again");
                *self.credentials.write().await = None;
                self.call_once(operation, &request).await
            }
            other => other,
        }
    }

    async fn call_once(
        &self,
        operation: &str,
        request: &BackendRequest,
    ) -> Result<Option<Value>, BackendError> {
        let token = self.token().await?;
        let mut request = request.clone().with_header("X-Vault-Token", token.expose());
        if let Some(ns) = &self.namespace {
            request = request.with_header("X-Vault-Namespace", ns.as_str());
        }

        let client = &self.client;
        let request = &request;
        retry_with_backoff(&self.retry, operation, || async move {
            client.execute(request).await
        })
        .await
    }
}

fn cas_mismatch_as_conflict(err: BackendError) -> BackendError {
    match err {
        BackendError::Rejected { status: 400, message } if message.contains("check-and-set") => {
            BackendError::Conflict(message)
        }
        other => other,
    }
}

#[async_trait]
impl SecretStore for VaultAdapter {
    async fn read_secret(
        &self,
        path: &str,
        version: Option<u64>,
    ) -> Result<Option<SecretRecord>, BackendError> {
        let mut request = BackendRequest::get(self.data_path(path));
        if let Some(v) = version {
            request = request.with_query("version", v.to_string());
        }

        match self.call("vault.read_secret", request).await {
            Ok(Some(body)) => parse_record(path, &body),
            Ok(None) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_secret(
        &self,
        path: &str,
        data: &Map<String, Value>,
        cas: Option<u64>,
    ) -> Result<u64, BackendError> {
        let mut body = json!({ "data": data });
        if let Some(cas) = cas {
            body["options"] = json!({ "cas": cas });
        }

        let response = self
            .call("vault.write_secret", BackendRequest::post(self.data_path(path), body))
            .await
            .map_err(cas_mismatch_as_conflict)?
            .ok_or_else(|| BackendError::Decode("empty write response".to_string()))?;

        response
            .get("data")
            .and_then(|d| d.get("version"))
            .and_then(Value::as_u64)
            .ok_or_else(|| BackendError::Decode("write response has no version".to_string()))
    }

    async fn delete_secret(&self, path: &str) -> Result<(), BackendError> {
        let request = BackendRequest::delete(self.metadata_path(path));
        self.call("vault.delete_secret", request).await?;
        Ok(())
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let request = BackendRequest::get(self.metadata_path(prefix)).with_query("list", "true");
        let body = match self.call("vault.list_secrets", request).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(Vec::new()),
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(body
            .get("data")
            .and_then(|d| d.get("keys"))
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
