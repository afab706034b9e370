use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{classify_status, BackendClient, BackendError, BackendRequest};

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

/// Credentials attached to every request
#[derive(Clone, Default)]
pub enum HttpAuth {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpAuth::None => write!(f, "None"),
            HttpAuth::Bearer(_) => write!(f, "Bearer(***)"),
            HttpAuth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub verify_tls: bool,
    /// Extra PEM CA bundle to trust
    pub ca_cert: Option<PathBuf>,
    /// PEM client certificate and key for mutual TLS
    pub client_identity: Option<(PathBuf, PathBuf)>,
    pub auth: HttpAuth,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            verify_tls: true,
            ca_cert: None,
            client_identity: None,
            auth: HttpAuth::None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }
}

#[derive(Clone)]
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    auth: HttpAuth,
}

impl HttpBackendClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(ca_path) = &config.ca_cert {
            let pem = read_pem(ca_path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| BackendError::Client(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some((cert_path, key_path)) = &config.client_identity {
            let mut pem = read_pem(cert_path)?;
            pem.extend(read_pem(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| BackendError::Client(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| BackendError::Client(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn read_pem(path: &PathBuf) -> Result<Vec<u8>, BackendError> {
    std::fs::read(path)
        .map_err(|e| BackendError::Client(format!("failed to read {}: {}", path.display(), e)))
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::Client(err.to_string())
    } else {
        // timeouts, refused connections, resets
        BackendError::Transient(err.to_string())
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn execute(&self, request: &BackendRequest) -> Result<Option<Value>, BackendError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, url = %url, "Backend request");

        let mut req = self.client.request(request.method.clone(), &url);

        req = match &self.auth {
            HttpAuth::None => req,
            HttpAuth::Bearer(token) => req.bearer_auth(token),
            HttpAuth::Basic { username, password } => req.basic_auth(username, Some(password)),
        };

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}
