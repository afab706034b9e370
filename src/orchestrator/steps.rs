use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
    Relabel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Relabel => "relabel",
        })
    }
}

/// Workflow steps, in execution order for each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CheckExisting,
    CreatePceCluster,
    AttachLabels,
    RegisterWorkloadProfile,
    StoreSecret,
    ProvisionNamespace,
    MarkOnline,
    DeleteNamespaceBinding,
    DeleteSecret,
    DeletePceCluster,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::CheckExisting => "check-existing",
            Step::CreatePceCluster => "create-pce-cluster",
            Step::AttachLabels => "attach-labels",
            Step::RegisterWorkloadProfile => "register-workload-profile",
            Step::StoreSecret => "store-secret",
            Step::ProvisionNamespace => "provision-namespace",
            Step::MarkOnline => "mark-online",
            Step::DeleteNamespaceBinding => "delete-namespace-binding",
            Step::DeleteSecret => "delete-secret",
            Step::DeletePceCluster => "delete-pce-cluster",
        })
    }
}

/// Something a workflow created or is about to remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    PceCluster { href: String },
    SecretRecord { path: String },
    Namespace { name: String },
    ServiceAccount { namespace: String, name: String },
    KubeSecret { namespace: String, name: String },
}

impl Resource {
    /// Delete step that removes this resource
    pub fn delete_step(&self) -> Step {
        match self {
            Resource::PceCluster { .. } => Step::DeletePceCluster,
            Resource::SecretRecord { .. } => Step::DeleteSecret,
            Resource::Namespace { .. }
            | Resource::ServiceAccount { .. }
            | Resource::KubeSecret { .. } => Step::DeleteNamespaceBinding,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::PceCluster { href } => write!(f, "PCE container cluster {}", href),
            Resource::SecretRecord { path } => write!(f, "Vault secret {}", path),
            Resource::Namespace { name } => write!(f, "namespace {}", name),
            Resource::ServiceAccount { namespace, name } => {
                write!(f, "service account {}/{}", namespace, name)
            }
            Resource::KubeSecret { namespace, name } => write!(f, "secret {}/{}", namespace, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub resource: Resource,
    pub error: String,
}

/// Outcome of compensating a failed create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub undone: Vec<Resource>,
    pub failed: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_steps() {
        let ns = Resource::Namespace {
            name: "payments".to_string(),
        };
        assert_eq!(ns.delete_step(), Step::DeleteNamespaceBinding);
        assert_eq!(
            Resource::SecretRecord {
                path: "x".to_string()
            }
            .delete_step(),
            Step::DeleteSecret
        );
        assert_eq!(ns.to_string(), "namespace payments");
    }

    #[test]
    fn test_rollback_report_completeness() {
        let mut report = RollbackReport::default();
        assert!(report.is_complete());
        report.failed.push(RollbackFailure {
            resource: Resource::PceCluster {
                href: "/orgs/1/container_clusters/a".to_string(),
            },
            error: "timeout".to_string(),
        });
        assert!(!report.is_complete());
    }
}
