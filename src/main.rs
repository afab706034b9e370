use std::process;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use illumio_cluster_manager::cli::{build_orchestrator, execute, format_error, Cli, CommandError};
use illumio_cluster_manager::config::load_settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let orchestrator = match build_orchestrator(&settings).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to initialize backends: {}", e);
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    debug!(command = ?cli.command, "Executing");
    match execute(&cli.command, &orchestrator).await {
        Ok(output) => print!("{}", output),
        Err(CommandError::Operation(e)) => {
            eprint!("{}", format_error(&e));
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
