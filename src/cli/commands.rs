//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::{Commands, CreateClusterArgs};
use super::display::{
    format_cluster_detail, format_cluster_list, format_create_result, format_delete_result,
};
use crate::backend::BackendError;
use crate::config::{ConfigError, Settings};
use crate::context::RequestContext;
use crate::error::Error;
use crate::orchestrator::{ClusterOrchestrator, OrchestratorConfig};
use crate::pce::PceAdapter;
use crate::runtime::KubeRuntime;
use crate::vault::VaultAdapter;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to set up backend client: {0}")]
    Setup(#[from] BackendError),

    #[error(transparent)]
    Operation(#[from] Error),

    #[error("Cluster {0} not found")]
    NotFound(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Setup
// ============================================================================

/// Wire the real adapters into an orchestrator
pub async fn build_orchestrator(settings: &Settings) -> CommandResult<ClusterOrchestrator> {
    let pce = PceAdapter::from_settings(&settings.pce)?;
    let vault = VaultAdapter::from_settings(&settings.vault)?;
    let runtime = KubeRuntime::connect(&settings.kubernetes).await?;
    debug!(
        pce = %settings.pce.base_url,
        vault = %settings.vault.address,
        "Backends configured"
    );

    Ok(ClusterOrchestrator::new(
        Arc::new(pce),
        Arc::new(vault),
        Arc::new(runtime),
        OrchestratorConfig::from_settings(settings),
    ))
}

/// Request context for a create-cluster invocation
pub fn create_request(args: &CreateClusterArgs, default_namespace: &str) -> RequestContext {
    let namespace = args.namespace.as_deref().unwrap_or(default_namespace);
    let description = args
        .description
        .clone()
        .unwrap_or_else(|| format!("Managed cluster: {}", args.name));

    RequestContext::new(&args.name, namespace)
        .with_description(description)
        .with_enforcement_mode(args.enforcement_mode())
        .with_labels(args.labels.iter().cloned())
        .with_force_recreate(args.force)
        .with_dry_run(args.dry_run)
}

// ============================================================================
// Commands
// ============================================================================

/// Run one command and return what to print
pub async fn execute(
    command: &Commands,
    orchestrator: &ClusterOrchestrator,
) -> CommandResult<String> {
    match command {
        Commands::CreateCluster(args) => {
            let ctx = create_request(args, &orchestrator.config().default_namespace);
            let cluster = orchestrator.create_cluster(ctx).await?;
            Ok(format_create_result(&cluster, args.dry_run))
        }
        Commands::DeleteCluster(args) => {
            orchestrator.delete_cluster(&args.name).await?;
            Ok(format_delete_result(&args.name))
        }
        Commands::ListClusters => {
            let clusters = orchestrator.list_clusters().await?;
            Ok(format_cluster_list(&clusters))
        }
        Commands::GetCluster(args) => match orchestrator.get_cluster(&args.name).await? {
            Some(cluster) => Ok(format_cluster_detail(&cluster)),
            None => Err(CommandError::NotFound(args.name.clone())),
        },
        Commands::LabelCluster(args) => {
            let cluster = orchestrator
                .update_cluster_labels(&args.name, &args.labels)
                .await?;
            Ok(format_cluster_detail(&cluster))
        }
    }
}
