//! Main entry point for the crypto-history-exporter CLI

use clap::Parser;
use crypto_history_exporter::cli::{Cli, Commands};
use crypto_history_exporter::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(debug: bool) {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if debug {
        "crypto_history_exporter=debug"
    } else {
        "crypto_history_exporter=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.debug);

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    // Execute command
    let result = match cli.command {
        Commands::Export(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map(|summary| summary.exit_code())
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Sources(ref sources_cmd) => sources_cmd.execute().await.map(|()| 0),
        Commands::Validate(ref validate_cmd) => validate_cmd
            .execute(&cli.config)
            .await
            .map(|()| 0)
            .map_err(|e| anyhow::anyhow!(e)),
    };

    // Handle result; an export that fails before any job runs completed nothing
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            let code = if matches!(cli.command, Commands::Export(_)) { 2 } else { 1 };
            std::process::exit(code);
        }
    }
}
