use std::path::PathBuf;
use std::time::Duration;

use super::{ConfigError, EnvReader, RetrySettings, SecretValue};
use crate::vault::AuthMethod;

#[derive(Debug, Clone, PartialEq)]
pub struct VaultTlsSettings {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VaultSettings {
    pub address: String,
    pub namespace: Option<String>,
    pub auth: AuthMethod,
    pub tls: VaultTlsSettings,
    /// KV v2 mount
    pub mount_point: String,
    /// Prefix under which cluster records are stored
    pub secret_path: String,
    pub timeout: Duration,
    pub retry: RetrySettings,
}

impl VaultSettings {
    pub(super) fn from_reader<F: Fn(&str) -> Option<String>>(
        env: &EnvReader<F>,
    ) -> Result<Self, ConfigError> {
        let tls = VaultTlsSettings {
            ca_cert: env.path("VAULT_CACERT"),
            client_cert: env.path("VAULT_CLIENT_CERT"),
            client_key: env.path("VAULT_CLIENT_KEY"),
            verify: env.flag("VAULT_TLS_VERIFY", true)?,
        };

        let method = env
            .get("VAULT_AUTH_METHOD")
            .unwrap_or_else(|| "token".to_string())
            .to_ascii_lowercase();

        let auth = match method.as_str() {
            "token" => AuthMethod::Token {
                token: SecretValue::new(env.required("VAULT_TOKEN")?),
            },
            "approle" => AuthMethod::AppRole {
                role_id: env.required("VAULT_ROLE_ID")?,
                secret_id: SecretValue::new(env.required("VAULT_SECRET_ID")?),
                mount: env.get("VAULT_AUTH_MOUNT").unwrap_or_else(|| "approle".to_string()),
            },
            "cert" => {
                if tls.client_cert.is_none() || tls.client_key.is_none() {
                    return Err(ConfigError::Missing(
                        "VAULT_CLIENT_CERT and VAULT_CLIENT_KEY (required for cert auth)"
                            .to_string(),
                    ));
                }
                AuthMethod::TlsCert {
                    mount: env.get("VAULT_AUTH_MOUNT").unwrap_or_else(|| "cert".to_string()),
                    role: env.get("VAULT_CERT_ROLE"),
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "VAULT_AUTH_METHOD".to_string(),
                    message: format!("'{}' is not one of token, approle, cert", other),
                })
            }
        };

        Ok(Self {
            address: env.url("VAULT_ADDR")?,
            namespace: env.get("VAULT_NAMESPACE"),
            auth,
            tls,
            mount_point: env
                .get("VAULT_MOUNT_POINT")
                .unwrap_or_else(|| "secret".to_string())
                .trim_matches('/')
                .to_string(),
            secret_path: env
                .get("VAULT_SECRET_PATH")
                .unwrap_or_else(|| "illumio-cluster-manager".to_string())
                .trim_matches('/')
                .to_string(),
            timeout: env.seconds("VAULT_TIMEOUT", 30.0)?,
            retry: env.retry("VAULT_RETRY_ATTEMPTS", "VAULT_RETRY_DELAY", 0.1)?,
        })
    }
}
