use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Idle,
    #[default]
    VisibilityOnly,
    Full,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Idle => "idle",
            EnforcementMode::VisibilityOnly => "visibility_only",
            EnforcementMode::Full => "full",
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "idle" => Ok(EnforcementMode::Idle),
            "visibility_only" | "visibility" => Ok(EnforcementMode::VisibilityOnly),
            "full" | "enforced" => Ok(EnforcementMode::Full),
            other => Err(format!(
                "unknown enforcement mode '{}' (expected idle, visibility_only or full)",
                other
            )),
        }
    }
}

/// Pairing credential issued once when a container cluster is created.
///
/// Formatting never reveals the value; use [`ClusterToken::expose`] at the one
/// place it is handed to the secret store or the runtime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterToken(String);

impl ClusterToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClusterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterToken(***)")
    }
}

impl fmt::Display for ClusterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRef {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub href: String,
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Label {
    pub fn reference(&self) -> LabelRef {
        LabelRef {
            href: self.href.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerCluster {
    #[serde(default)]
    pub href: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub enforcement_mode: EnforcementMode,
    #[serde(default)]
    pub online: bool,
    /// Only present in the create response
    #[serde(default, rename = "container_cluster_token", skip_serializing)]
    pub token: Option<ClusterToken>,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContainerCluster {
    /// Trailing path segment of the href
    pub fn cluster_id(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or_default()
    }

    pub fn status(&self) -> &'static str {
        if self.online {
            "online"
        } else {
            "offline"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCluster {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enforcement_mode: EnforcementMode,
}

/// Partial update, absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<LabelRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ClusterUpdate {
    pub fn labels(labels: Vec<LabelRef>) -> Self {
        Self {
            labels: Some(labels),
            ..Default::default()
        }
    }

    pub fn online(online: bool) -> Self {
        Self {
            online: Some(online),
            ..Default::default()
        }
    }
}

/// Maps a Kubernetes namespace inside a container cluster to PCE policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub href: String,
    pub namespace: String,
    pub managed: bool,
    pub enforcement_mode: EnforcementMode,
    #[serde(default)]
    pub assign_labels: Vec<LabelRef>,
}

impl WorkloadProfile {
    pub fn for_namespace(
        namespace: impl Into<String>,
        enforcement_mode: EnforcementMode,
        assign_labels: Vec<LabelRef>,
    ) -> Self {
        Self {
            href: String::new(),
            namespace: namespace.into(),
            managed: true,
            enforcement_mode,
            assign_labels,
        }
    }
}
