//! CLI module for illumio-cluster-manager
//!
//! Subcommands map one to one onto orchestrator operations:
//! - `create-cluster` - Create a container cluster and its namespace binding
//! - `delete-cluster` - Remove a cluster and everything provisioned for it
//! - `list-clusters` - List container clusters
//! - `get-cluster` - Show one cluster
//! - `label-cluster` - Replace a cluster's labels

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::context::LabelSpec;
use crate::pce::EnforcementMode;

#[derive(Parser, Debug)]
#[command(name = "illumio-cluster-manager")]
#[command(about = "Provision Illumio container clusters for Kubernetes namespaces")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file with connection settings
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and configure a new container cluster
    CreateCluster(CreateClusterArgs),

    /// Delete a container cluster and associated resources
    DeleteCluster(ClusterNameArgs),

    /// List container clusters
    ListClusters,

    /// Show details of a container cluster
    GetCluster(ClusterNameArgs),

    /// Replace the labels of a container cluster
    LabelCluster(LabelClusterArgs),
}

/// Arguments for the create-cluster command
#[derive(Parser, Debug)]
pub struct CreateClusterArgs {
    /// Cluster name (lowercase letters, digits and '-')
    pub name: String,

    /// Kubernetes namespace to bind (default: K8S_NAMESPACE)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Enable full enforcement
    #[arg(long, overrides_with = "no_enforce")]
    pub enforce: bool,

    /// Visibility only (the default)
    #[arg(long, overrides_with = "enforce")]
    pub no_enforce: bool,

    /// Explicit enforcement mode; wins over --enforce
    #[arg(long, value_name = "MODE")]
    pub mode: Option<EnforcementMode>,

    #[arg(long)]
    pub description: Option<String>,

    /// Label to attach, as KEY=VALUE (repeatable)
    #[arg(short, long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<LabelSpec>,

    /// Replace the cluster even if it is already online
    #[arg(long)]
    pub force: bool,

    /// Only read from the backends and report what would change
    #[arg(long)]
    pub dry_run: bool,
}

impl CreateClusterArgs {
    pub fn enforcement_mode(&self) -> EnforcementMode {
        match self.mode {
            Some(mode) => mode,
            None if self.enforce => EnforcementMode::Full,
            None => EnforcementMode::VisibilityOnly,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ClusterNameArgs {
    pub name: String,
}

/// Arguments for the label-cluster command
#[derive(Parser, Debug)]
pub struct LabelClusterArgs {
    pub name: String,

    /// Label as KEY=VALUE; the given set replaces the current one
    #[arg(short, long = "label", value_name = "KEY=VALUE", required = true)]
    pub labels: Vec<LabelSpec>,
}
