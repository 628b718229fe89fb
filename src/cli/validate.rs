//! Validation subcommand

use super::CliError;
use crate::config::Config;
use crate::downloader::FetchJob;
use crate::resume::{FileCheckpointStore, ResumeState};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Validate command for checking configuration and checkpoints
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// What to validate
    #[command(subcommand)]
    pub target: ValidateTarget,
}

/// Target type for validation
#[derive(clap::Subcommand, Debug)]
pub enum ValidateTarget {
    /// Parse the config file and derive settings for every configured job
    Config,
    /// Check every checkpoint file in the resume directory
    ResumeState {
        /// Resume state directory
        #[arg(long, default_value = ".resume")]
        resume_dir: PathBuf,
    },
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, config_path: &Path) -> Result<(), CliError> {
        match &self.target {
            ValidateTarget::Config => validate_config(config_path),
            ValidateTarget::ResumeState { resume_dir } => validate_resume_state(resume_dir),
        }
    }
}

fn validate_config(config_path: &Path) -> Result<(), CliError> {
    let config = Config::from_file(config_path)?;
    println!("Valid config: {}", config_path.display());

    for (name, exchange) in &config.exchanges {
        let status = if exchange.enabled { "enabled" } else { "disabled" };
        println!("  {name} ({status}, {} account(s))", exchange.accounts.len());
        if !exchange.enabled {
            continue;
        }
        let registry = crate::registry::ExchangeRegistry::load()
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        for limits in registry.get(name)?.data_types() {
            let settings = config.job_settings(name, limits.data_type)?;
            println!(
                "    {:<12} window {}h, {} req/{}s",
                limits.data_type.as_str(),
                settings.max_window_span_ms / 3_600_000,
                settings.rate_limit.max_requests,
                settings.rate_limit.interval.as_secs()
            );
        }
    }
    Ok(())
}

/// Load every checkpoint and check it against the job it claims to belong to
fn validate_resume_state(resume_dir: &Path) -> Result<(), CliError> {
    if !resume_dir.exists() {
        println!("No resume state found at {}", resume_dir.display());
        return Ok(());
    }
    if !resume_dir.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a directory",
            resume_dir.display()
        )));
    }

    let listed = FileCheckpointStore::new(resume_dir).list()?;
    if listed.is_empty() {
        println!("Resume directory exists but contains no state files");
        return Ok(());
    }
    println!("Found {} resume state file(s)", listed.len());

    let mut valid_count = 0;
    let mut invalid_count = 0;
    for (path, loaded) in listed {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match loaded.map_err(CliError::from).and_then(|state| check_state(&state).map(|()| state)) {
            Ok(state) => {
                let checkpoint = state.checkpoint();
                let status = if checkpoint.is_complete() { "complete" } else { "partial" };
                println!(
                    "  - {filename} ({status}, {} window(s), {} record(s), resume from {})",
                    checkpoint.completed().len(),
                    checkpoint.total_records(),
                    checkpoint.frontier()
                );
                valid_count += 1;
            }
            Err(e) => {
                println!("  - {filename} (invalid: {e})");
                invalid_count += 1;
            }
        }
    }

    println!("\nSummary:");
    println!("  Valid files: {valid_count}");
    if invalid_count > 0 {
        println!("  Invalid files: {invalid_count}");
        return Err(CliError::InvalidArgument(format!(
            "Found {invalid_count} invalid resume state file(s). Use --resume reset to clear."
        )));
    }
    Ok(())
}

fn check_state(state: &ResumeState) -> Result<(), CliError> {
    let range = state.checkpoint().range();
    let job = FetchJob::new(
        state.exchange(),
        state.account(),
        state.data_type(),
        range.start,
        range.end,
    )?;
    state.checkpoint().validate(&job)?;
    Ok(())
}
