//! Settings for the three backends, read from the environment
//!
//! Parsing works on any key lookup function so it can be exercised without
//! touching the process environment. [`load_settings`] is the I/O boundary: it
//! optionally loads a `.env` file and then reads the real environment.

pub mod vault;

pub use vault::{VaultSettings, VaultTlsSettings};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load env file {path}: {message}")]
    EnvFile { path: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// SBIO: Pure data structures
// ============================================================================

/// A credential read from configuration; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, self.delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PceSettings {
    pub base_url: String,
    pub org_id: u64,
    pub api_version: String,
    pub verify_ssl: bool,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub api_user: Option<String>,
    pub api_key: Option<SecretValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KubernetesSettings {
    /// Namespace used when a request does not name one
    pub namespace: String,
    pub service_account: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub in_cluster: bool,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub pce: PceSettings,
    pub vault: VaultSettings,
    pub kubernetes: KubernetesSettings,
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Typed accessors over a key lookup
pub(crate) struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub(crate) fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Trimmed value; empty strings count as unset
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub(crate) fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string())),
            None => Ok(default),
        }
    }

    pub(crate) fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", raw))),
            },
            None => Ok(default),
        }
    }

    /// Seconds, fractional allowed
    pub(crate) fn seconds(&self, key: &str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parse(key, default)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::invalid(key, "must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    pub(crate) fn url(&self, key: &str) -> Result<String, ConfigError> {
        let url = self.required(key)?;
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::invalid(key, "must start with http:// or https://"));
        }
        Ok(url.trim_end_matches('/').to_string())
    }

    pub(crate) fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
    }

    pub(crate) fn retry(
        &self,
        attempts_key: &str,
        delay_key: &str,
        default_delay: f64,
    ) -> Result<RetrySettings, ConfigError> {
        Ok(RetrySettings {
            attempts: self.parse(attempts_key, 3u32)?,
            delay: self.seconds(delay_key, default_delay)?,
        })
    }
}

impl PceSettings {
    fn from_reader<F: Fn(&str) -> Option<String>>(env: &EnvReader<F>) -> Result<Self, ConfigError> {
        let org_id: u64 = match env.get("ILLUMIO_ORG_ID") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::invalid("ILLUMIO_ORG_ID", format!("'{}' is not an integer", raw))
            })?,
            None => return Err(ConfigError::Missing("ILLUMIO_ORG_ID".to_string())),
        };

        let api_user = env.get("ILLUMIO_API_USER");
        let api_key = env.get("ILLUMIO_API_KEY").map(SecretValue::new);
        if api_user.is_some() != api_key.is_some() {
            return Err(ConfigError::invalid(
                "ILLUMIO_API_USER",
                "ILLUMIO_API_USER and ILLUMIO_API_KEY must be set together",
            ));
        }

        Ok(Self {
            base_url: env.url("ILLUMIO_BASE_URL")?,
            org_id,
            api_version: env.get("ILLUMIO_API_VERSION").unwrap_or_else(|| "v2".to_string()),
            verify_ssl: env.flag("ILLUMIO_VERIFY_SSL", true)?,
            timeout: env.seconds("ILLUMIO_TIMEOUT", 30.0)?,
            retry: env.retry("ILLUMIO_RETRY_ATTEMPTS", "ILLUMIO_RETRY_DELAY", 1.0)?,
            api_user,
            api_key,
        })
    }
}

impl KubernetesSettings {
    fn from_reader<F: Fn(&str) -> Option<String>>(env: &EnvReader<F>) -> Result<Self, ConfigError> {
        let namespace = env
            .get("K8S_NAMESPACE")
            .unwrap_or_else(|| "illumio-system".to_string());
        if !crate::context::validation::is_valid_namespace(&namespace) {
            return Err(ConfigError::invalid(
                "K8S_NAMESPACE",
                format!("'{}' is not a valid namespace", namespace),
            ));
        }

        Ok(Self {
            namespace,
            service_account: env
                .get("K8S_SERVICE_ACCOUNT")
                .unwrap_or_else(|| "illumio-service".to_string()),
            kubeconfig: env.path("KUBECONFIG"),
            context: env.get("K8S_CONTEXT"),
            in_cluster: env.flag("K8S_IN_CLUSTER", false)?,
            retry: env.retry("K8S_RETRY_ATTEMPTS", "K8S_RETRY_DELAY", 0.5)?,
        })
    }
}

impl Settings {
    /// Build settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader::new(lookup);
        Ok(Self {
            pce: PceSettings::from_reader(&env)?,
            vault: VaultSettings::from_reader(&env)?,
            kubernetes: KubernetesSettings::from_reader(&env)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load settings, first applying an optional `.env` file to the environment.
/// Variables already set in the environment win over the file.
pub fn load_settings(env_file: Option<&Path>) -> Result<Settings, ConfigError> {
    if let Some(path) = env_file {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        dotenvy::from_path(&expanded).map_err(|e| ConfigError::EnvFile {
            path: expanded.clone(),
            message: e.to_string(),
        })?;
    }
    Settings::from_env()
}
