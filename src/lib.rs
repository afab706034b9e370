//! Provision Illumio PCE container clusters and bind them to Kubernetes namespaces.
//!
//! The [`orchestrator::ClusterOrchestrator`] drives three backends through
//! narrow traits: [`pce::PceApi`], [`vault::SecretStore`] and
//! [`runtime::ClusterRuntime`].

pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod labels;
pub mod orchestrator;
pub mod pce;
pub mod retry;
pub mod runtime;
pub mod vault;

#[cfg(test)]
mod mock;

pub use error::{ClusterOperationError, Error};
pub use orchestrator::{ClusterOrchestrator, OrchestratorConfig};
