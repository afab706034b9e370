//! Error taxonomy for cluster lifecycle operations
//!
//! Adapters fail with [`BackendError`]; everything that reaches a caller is an
//! [`Error`], tagged by which backend produced it. Orchestrated workflows wrap the
//! failing step's error in a [`ClusterOperationError`].

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::orchestrator::{Operation, Resource, RollbackReport, Step};

/// Errors surfaced by the orchestrator and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("PCE unavailable after retries: {0}")]
    TransientBackend(#[source] BackendError),

    #[error("PCE rejected request: {0}")]
    BackendRejection(#[source] BackendError),

    #[error("secret store error: {0}")]
    SecretIntegration(#[source] BackendError),

    #[error("kubernetes provisioning error: {0}")]
    RuntimeProvisioning(#[source] BackendError),

    #[error(transparent)]
    ClusterOperation(Box<ClusterOperationError>),

    #[error("workflow aborted: {0}")]
    Aborted(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap a PCE adapter failure
    pub fn pce(err: BackendError) -> Self {
        if err.is_transient() {
            Self::TransientBackend(err)
        } else {
            Self::BackendRejection(err)
        }
    }

    /// Wrap a secret store adapter failure
    pub fn secret(err: BackendError) -> Self {
        Self::SecretIntegration(err)
    }

    /// Wrap a cluster runtime adapter failure
    pub fn runtime(err: BackendError) -> Self {
        Self::RuntimeProvisioning(err)
    }

    /// The orchestration failure, if this error came out of a workflow
    pub fn as_cluster_operation(&self) -> Option<&ClusterOperationError> {
        match self {
            Self::ClusterOperation(op) => Some(op),
            _ => None,
        }
    }
}

impl From<ClusterOperationError> for Error {
    fn from(err: ClusterOperationError) -> Self {
        Self::ClusterOperation(Box::new(err))
    }
}

/// A create/delete workflow that failed at a specific step
#[derive(Debug)]
pub struct ClusterOperationError {
    pub operation: Operation,
    pub cluster: String,
    pub step: Step,
    pub cause: Error,
    /// Compensation outcome for create workflows
    pub rollback: Option<RollbackReport>,
    /// Resources a delete workflow did not get to
    pub remaining: Vec<Resource>,
}

impl ClusterOperationError {
    pub fn new(operation: Operation, cluster: impl Into<String>, step: Step, cause: Error) -> Self {
        Self {
            operation,
            cluster: cluster.into(),
            step,
            cause,
            rollback: None,
            remaining: Vec::new(),
        }
    }

    pub fn with_rollback(mut self, report: RollbackReport) -> Self {
        self.rollback = Some(report);
        self
    }

    pub fn with_remaining(mut self, remaining: Vec<Resource>) -> Self {
        self.remaining = remaining;
        self
    }

    /// True when nothing created by the failed workflow was left behind
    pub fn rollback_complete(&self) -> bool {
        self.rollback.as_ref().map(|r| r.is_complete()).unwrap_or(true)
    }

    /// Resources that need an operator's attention
    pub fn manual_cleanup(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .rollback
            .iter()
            .flat_map(|r| r.failed.iter().map(|f| f.resource.clone()))
            .collect();
        resources.extend(self.remaining.iter().cloned());
        resources
    }
}

impl fmt::Display for ClusterOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to {} cluster '{}' at step {}: {}",
            self.operation, self.cluster, self.step, self.cause
        )?;
        if let Some(report) = &self.rollback {
            if report.is_complete() {
                write!(f, " (rollback complete)")?;
            } else {
                write!(f, " (rollback incomplete: {} failed)", report.failed.len())?;
            }
        }
        if !self.remaining.is_empty() {
            write!(f, " ({} resources remain)", self.remaining.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for ClusterOperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
