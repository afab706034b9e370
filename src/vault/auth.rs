use std::fmt;

use serde_json::{json, Value};

use crate::backend::{BackendClient, BackendError, BackendRequest};
use crate::config::SecretValue;

/// How the adapter obtains a Vault client token
#[derive(Clone, PartialEq)]
pub enum AuthMethod {
    /// Pre-issued token, used as is
    Token { token: SecretValue },
    /// AppRole login at `auth/{mount}/login`
    AppRole {
        role_id: String,
        secret_id: SecretValue,
        mount: String,
    },
    /// TLS certificate login; the client certificate is presented by the transport
    TlsCert { mount: String, role: Option<String> },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Token { .. } => write!(f, "Token(***)"),
            AuthMethod::AppRole { role_id, mount, .. } => {
                write!(f, "AppRole(role_id={}, mount={})", role_id, mount)
            }
            AuthMethod::TlsCert { mount, role } => {
                write!(f, "TlsCert(mount={}, role={:?})", mount, role)
            }
        }
    }
}

/// A client token and its lease
#[derive(Clone)]
pub struct VaultCredentials {
    pub token: SecretValue,
    pub lease_duration: Option<u64>,
    pub renewable: bool,
}

impl fmt::Debug for VaultCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCredentials")
            .field("token", &"***")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Token { .. } => "token",
            AuthMethod::AppRole { .. } => "approle",
            AuthMethod::TlsCert { .. } => "cert",
        }
    }

    /// Whether a rejected token can be replaced by logging in again
    pub fn can_reauthenticate(&self) -> bool {
        !matches!(self, AuthMethod::Token { .. })
    }

    fn login_request(&self) -> Option<BackendRequest> {
        match self {
            AuthMethod::Token { .. } => None,
            AuthMethod::AppRole {
                role_id,
                secret_id,
                mount,
            } => Some(BackendRequest::post(
                format!("/v1/auth/{}/login", mount.trim_matches('/')),
                json!({"role_id": role_id, "secret_id": secret_id.expose()}),
            )),
            AuthMethod::TlsCert { mount, role } => {
                let body = match role {
                    Some(name) => json!({"name": name}),
                    None => json!({}),
                };
                Some(BackendRequest::post(
                    format!("/v1/auth/{}/login", mount.trim_matches('/')),
                    body,
                ))
            }
        }
    }

    pub async fn authenticate(
        &self,
        client: &dyn BackendClient,
        namespace: Option<&str>,
    ) -> Result<VaultCredentials, BackendError> {
        if let AuthMethod::Token { token } = self {
            return Ok(VaultCredentials {
                token: token.clone(),
                lease_duration: None,
                renewable: false,
            });
        }
        let Some(mut request) = self.login_request() else {
            return Err(BackendError::Client(format!("{} auth has no login endpoint", self.name())));
        };

        if let Some(ns) = namespace {
            request = request.with_header("X-Vault-Namespace", ns);
        }

        let body = client
            .execute(&request)
            .await
            .map_err(|e| match e {
                // Vault answers bad credentials with 400
                BackendError::Rejected { status: 400, message } => BackendError::Auth(message),
                other => other,
            })?
            .ok_or_else(|| BackendError::Decode("empty login response".to_string()))?;

        parse_login(&body)
    }
}

fn parse_login(body: &Value) -> Result<VaultCredentials, BackendError> {
    let auth = body
        .get("auth")
        .ok_or_else(|| BackendError::Decode("login response has no auth block".to_string()))?;
    let token = auth
        .get("client_token")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::Decode("login response has no client_token".to_string()))?;

    Ok(VaultCredentials {
        token: SecretValue::new(token),
        lease_duration: auth.get("lease_duration").and_then(Value::as_u64),
        renewable: auth.get("renewable").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedClient;

    #[tokio::test]
    async fn test_token_auth_makes_no_calls() {
        let client = ScriptedClient::new(vec![]);
        let method = AuthMethod::Token {
            token: SecretValue::new("s.static"),
        };

        let creds = method.authenticate(&client, None).await.unwrap();
        assert_eq!(creds.token.expose(), "s.static");
        assert_eq!(client.call_count(), 0);
        assert!(!method.can_reauthenticate());
    }

    #[tokio::test]
    async fn test_approle_login() {
        let client = ScriptedClient::new(vec![Ok(Some(json!({
            "auth": {"client_token": "s.issued", "lease_duration": 3600, "renewable": true}
        })))]);
        let method = AuthMethod::AppRole {
            role_id: "role-1".to_string(),
            secret_id: SecretValue::new("secret-1"),
            mount: "approle".to_string(),
        };

        let creds = method.authenticate(&client, Some("team-a")).await.unwrap();
        assert_eq!(creds.token.expose(), "s.issued");
        assert_eq!(creds.lease_duration, Some(3600));
        assert!(creds.renewable);

        let req = client.last_request().unwrap();
        assert_eq!(req.path, "/v1/auth/approle/login");
        assert_eq!(req.body.unwrap()["secret_id"], "secret-1");
        assert!(req.headers.iter().any(|(k, v)| k == "X-Vault-Namespace" && v == "team-a"));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let client = ScriptedClient::new(vec![Err(BackendError::Rejected {
            status: 400,
            message: "invalid secret id".to_string(),
        })]);
        let method = AuthMethod::AppRole {
            role_id: "role-1".to_string(),
            secret_id: SecretValue::new("wrong"),
            mount: "approle".to_string(),
        };

        let err = method.authenticate(&client, None).await.unwrap_err();
        assert!(matches!(err, BackendError::Auth(_)));
    }

    #[tokio::test]
    async fn test_cert_login_path() {
        let client = ScriptedClient::new(vec![Ok(Some(json!({
            "auth": {"client_token": "s.cert"}
        })))]);
        let method = AuthMethod::TlsCert {
            mount: "cert".to_string(),
            role: Some("cluster-manager".to_string()),
        };

        method.authenticate(&client, None).await.unwrap();
        let req = client.last_request().unwrap();
        assert_eq!(req.path, "/v1/auth/cert/login");
        assert_eq!(req.body.unwrap()["name"], "cluster-manager");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let method = AuthMethod::AppRole {
            role_id: "role-1".to_string(),
            secret_id: SecretValue::new("secret-1"),
            mount: "approle".to_string(),
        };
        let debug = format!("{:?}", method);
        assert!(debug.contains("role-1"));
        assert!(!debug.contains("secret-1"));
    }
}
