//! Per-request parameters for cluster operations

pub mod validation;

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::Error;
use crate::pce::EnforcementMode;

/// A `key=value` label to attach to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSpec {
    pub key: String,
    pub value: String,
}

impl LabelSpec {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !validation::is_valid_label_part(&self.key) {
            return Err(Error::validation(format!("invalid label key '{}'", self.key)));
        }
        if !validation::is_valid_label_part(&self.value) {
            return Err(Error::validation(format!(
                "invalid value '{}' for label '{}'",
                self.value, self.key
            )));
        }
        Ok(())
    }
}

impl FromStr for LabelSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(format!("expected KEY=VALUE, got '{}'", s));
        }
        Ok(Self::new(key, value))
    }
}

impl fmt::Display for LabelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Everything a create request carries
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub cluster_name: String,
    pub namespace: String,
    pub description: Option<String>,
    pub enforcement_mode: EnforcementMode,
    pub labels: Vec<LabelSpec>,
    /// Only read from backends, change nothing
    pub dry_run: bool,
    /// Replace a cluster that is already online
    pub force_recreate: bool,
    /// Correlates log lines of one operation
    pub operation_id: Uuid,
}

impl RequestContext {
    pub fn new(cluster_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            namespace: namespace.into(),
            description: None,
            enforcement_mode: EnforcementMode::default(),
            labels: Vec::new(),
            dry_run: false,
            force_recreate: false,
            operation_id: Uuid::new_v4(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enforcement_mode(mut self, mode: EnforcementMode) -> Self {
        self.enforcement_mode = mode;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(LabelSpec::new(key, value));
        self
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = LabelSpec>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force_recreate(mut self, force: bool) -> Self {
        self.force_recreate = force;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_cluster_name(&self.cluster_name)?;
        if !validation::is_valid_namespace(&self.namespace) {
            return Err(Error::validation(format!(
                "invalid namespace '{}': use lowercase letters, digits and '-'",
                self.namespace
            )));
        }
        validate_labels(&self.labels)
    }
}

pub fn validate_cluster_name(name: &str) -> Result<(), Error> {
    if validation::is_valid_cluster_name(name) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "invalid cluster name '{}': use 2-63 lowercase letters, digits and '-'",
            name
        )))
    }
}

/// Each label must be well formed and each key may appear once
pub fn validate_labels(labels: &[LabelSpec]) -> Result<(), Error> {
    for (i, label) in labels.iter().enumerate() {
        label.validate()?;
        if labels[..i].iter().any(|l| l.key == label.key) {
            return Err(Error::validation(format!(
                "label key '{}' given more than once",
                label.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_spec_parse() {
        let label: LabelSpec = "env=prod".parse().unwrap();
        assert_eq!(label, LabelSpec::new("env", "prod"));
        assert_eq!(label.to_string(), "env=prod");

        let label: LabelSpec = " loc = us-east ".parse().unwrap();
        assert_eq!(label.value, "us-east");

        assert!("env".parse::<LabelSpec>().is_err());
        assert!("=prod".parse::<LabelSpec>().is_err());
        assert!("env=".parse::<LabelSpec>().is_err());
    }

    #[test]
    fn test_builder() {
        let ctx = RequestContext::new("web", "payments")
            .with_description("payments cluster")
            .with_enforcement_mode(EnforcementMode::Full)
            .with_label("env", "prod")
            .with_dry_run(true)
            .with_force_recreate(true);

        assert_eq!(ctx.description.as_deref(), Some("payments cluster"));
        assert_eq!(ctx.enforcement_mode, EnforcementMode::Full);
        assert_eq!(ctx.labels.len(), 1);
        assert!(ctx.dry_run);
        assert!(ctx.force_recreate);
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_operation_ids_differ() {
        let a = RequestContext::new("web", "payments");
        let b = RequestContext::new("web", "payments");
        assert_ne!(a.operation_id, b.operation_id);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(matches!(
            RequestContext::new("Web", "payments").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            RequestContext::new("web", "Payments").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            RequestContext::new("web", "payments")
                .with_label("env", "prod east")
                .validate(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_label_keys() {
        let labels = vec![LabelSpec::new("env", "prod"), LabelSpec::new("env", "dev")];
        assert!(matches!(validate_labels(&labels), Err(Error::Validation(_))));
    }
}
