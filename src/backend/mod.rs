//! JSON-over-HTTP transport shared by the PCE and Vault adapters
//!
//! Adapters build [`BackendRequest`]s and interpret the decoded bodies; the
//! [`BackendClient`] owns the wire and classifies failures.

pub mod http;

pub use http::{HttpAuth, HttpBackendClient, HttpClientConfig};

use std::fmt;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use crate::retry::Transience;

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("client error: {0}")]
    Client(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict(_))
    }
}

impl Transience for BackendError {
    fn is_transient(&self) -> bool {
        BackendError::is_transient(self)
    }
}

/// Map a non-success HTTP status to a backend error
pub fn classify_status(status: u16, body: &str) -> BackendError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        body.trim().to_string()
    };

    match status {
        401 | 403 => BackendError::Auth(message),
        404 => BackendError::NotFound(message),
        409 => BackendError::Conflict(message),
        408 | 429 | 500..=599 => BackendError::Transient(message),
        _ => BackendError::Rejected { status, message },
    }
}

/// One call against a backend, relative to the client's base URL
#[derive(Clone)]
pub struct BackendRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl BackendRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

// Header values carry tokens; only names are printed.
impl fmt::Debug for BackendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("BackendRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &header_names)
            .finish()
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Execute one request. `Ok(None)` means a success with an empty body.
    async fn execute(&self, request: &BackendRequest) -> Result<Option<Value>, BackendError>;
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(404, ""), BackendError::NotFound(_)));
        assert!(matches!(classify_status(409, "dup"), BackendError::Conflict(_)));
        assert!(matches!(classify_status(403, ""), BackendError::Auth(_)));
        assert!(classify_status(503, "").is_transient());
        assert!(classify_status(429, "").is_transient());
        assert!(classify_status(408, "").is_transient());
        assert_eq!(
            classify_status(422, " invalid name "),
            BackendError::Rejected {
                status: 422,
                message: "invalid name".to_string()
            }
        );
    }

    #[test]
    fn test_empty_body_gets_status_message() {
        match classify_status(400, "") {
            BackendError::Rejected { message, .. } => assert_eq!(message, "HTTP 400"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_request_builders() {
        let req = BackendRequest::post("/v1/secret/data/x", json!({"a": 1}))
            .with_query("version", "2")
            .with_header("X-Vault-Token", "s.secret");

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.query, vec![("version".to_string(), "2".to_string())]);
        assert!(req.body.is_some());

        let debug = format!("{:?}", req);
        assert!(debug.contains("X-Vault-Token"));
        assert!(!debug.contains("s.secret"));
    }

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let client = mock::ScriptedClient::new(vec![
            Err(BackendError::Transient("503".to_string())),
            Ok(Some(json!({"ok": true}))),
        ]);
        let req = BackendRequest::get("/x");

        assert!(client.execute(&req).await.is_err());
        assert_eq!(client.execute(&req).await, Ok(Some(json!({"ok": true}))));
        assert_eq!(client.execute(&req).await, Ok(None));
        assert_eq!(client.call_count(), 3);
    }
}
