//! CLI command for listing supported exchanges

use crate::registry::ExchangeRegistry;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

/// Sources subcommand
#[derive(Debug, Args)]
pub struct SourcesCommand {
    #[command(subcommand)]
    action: SourcesAction,
}

/// Sources actions
#[derive(Debug, clap::Subcommand)]
enum SourcesAction {
    /// List registered exchanges with their data types and window limits
    List {
        /// Only show this exchange
        exchange: Option<String>,

        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },
}

/// Output format for sources command
#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

impl SourcesCommand {
    /// Execute the sources command
    pub async fn execute(&self) -> Result<()> {
        match &self.action {
            SourcesAction::List { exchange, format } => self.execute_list(exchange.as_deref(), format),
        }
    }

    fn execute_list(&self, exchange: Option<&str>, format: &OutputFormat) -> Result<()> {
        let registry = ExchangeRegistry::load_embedded()?;
        let entries: Vec<_> = match exchange {
            Some(name) => vec![registry.get(name)?],
            None => registry.entries().collect(),
        };

        match format {
            OutputFormat::Json => {
                let listed: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "exchange": entry.name(),
                            "description": entry.description(),
                            "rate_limit": entry.rate_limit(),
                            "data_types": entry.data_types(),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&listed)
                        .context("Failed to serialize results to JSON")?
                );
            }
            OutputFormat::Human => {
                println!("Found {} exchange(s):\n", entries.len());
                for entry in entries {
                    let limits = entry.rate_limit();
                    let weight = limits
                        .max_weight_per_minute
                        .map(|w| format!(", weight {w}/min"))
                        .unwrap_or_default();
                    println!(
                        "{} | {} | {} req/min{}",
                        entry.name(),
                        entry.description(),
                        limits.max_requests_per_minute,
                        weight
                    );
                    for data_type in entry.data_types() {
                        println!(
                            "    {:<12} max window {}h{}",
                            data_type.data_type.as_str(),
                            data_type.max_window_hours,
                            if data_type.native_ids { "" } else { " (composite ids)" }
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
