//! Configuration file parsing
//!
//! The exporter reads one TOML file with a `[global]` table, an optional
//! `[retry]` table and one `[exchanges.<name>]` table per exchange:
//!
//! ```toml
//! [global]
//! output_dir = "./output"
//! concurrency = 4
//!
//! [exchanges.binance_pm]
//! max_window_hours = 24
//! rate_limit = { max_requests_per_minute = 1200, max_weight_per_minute = 6000 }
//! accounts = [
//!     { name = "main", api_key = "${BINANCE_KEY}", api_secret = "${BINANCE_SECRET}" },
//! ]
//! ```
//!
//! A string value of the exact form `${VAR}` is replaced by the environment
//! variable `VAR`; unset variables are left verbatim. Anything not set in the
//! file falls back to the exchange registry.

use crate::downloader::config::{
    JobSettings, RetryPolicy, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_BASE_DELAY_MS,
    DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
};
use crate::downloader::check_name;
use crate::fetcher::Credentials;
use crate::registry::{ExchangeRegistry, RegistryError};
use crate::DataType;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// Config path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// File is not valid TOML or has the wrong shape
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Values are well-formed but unusable
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Exchange or data type unknown to the registry
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,
    /// Retry policy shared by every job
    #[serde(default)]
    pub retry: RetryConfig,
    /// Exchanges by name
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Output root directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Checkpoint directory
    #[serde(default = "default_resume_dir")]
    pub resume_dir: PathBuf,
    /// Jobs run at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Longest a page fetch may wait for rate budget
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Prometheus listen address (None = no exporter)
    pub metrics_addr: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_resume_dir() -> PathBuf {
    PathBuf::from(".resume")
}

fn default_concurrency() -> usize {
    4
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_SECS
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            resume_dir: default_resume_dir(),
            concurrency: default_concurrency(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            metrics_addr: None,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries per page
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Randomize backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Retry policy for jobs
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
            jitter: self.jitter,
        }
    }
}

/// Configuration for a single exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Disabled exchanges are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the registry's window span for every data type
    pub max_window_hours: Option<u32>,
    /// Overrides the registry's rate budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Accounts to export
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_enabled() -> bool {
    true
}

/// Rate budget overrides, per minute.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute
    pub max_requests_per_minute: Option<u32>,
    /// Request weight per minute
    pub max_weight_per_minute: Option<u32>,
}

/// Configuration for a single account.
#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    /// Account name used in paths and job ids
    pub name: String,
    /// API key
    pub api_key: String,
    /// API secret
    pub api_secret: String,
    /// Free-form account type (e.g. "portfolio_margin")
    pub account_type: Option<String>,
}

impl AccountConfig {
    /// Credentials for the exchange adapter
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
        }
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("api_key", &crate::fetcher::binance_http::redact(&self.api_key))
            .field("api_secret", &"***")
            .field("account_type", &self.account_type)
            .finish()
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        contents.parse()
    }

    /// Enabled exchange `name`
    pub fn exchange(&self, name: &str) -> Result<&ExchangeConfig, ConfigError> {
        let exchange = self
            .exchanges
            .get(name)
            .ok_or_else(|| ConfigError::Invalid(format!("exchange {name} is not configured")))?;
        if !exchange.enabled {
            return Err(ConfigError::Invalid(format!("exchange {name} is disabled")));
        }
        Ok(exchange)
    }

    /// Accounts of `exchange`, restricted to `only` when it is non-empty
    pub fn accounts<'a>(&'a self, exchange: &str, only: &[String]) -> Result<Vec<&'a AccountConfig>, ConfigError> {
        let accounts: Vec<&AccountConfig> = self
            .exchange(exchange)?
            .accounts
            .iter()
            .filter(|a| only.is_empty() || only.contains(&a.name))
            .collect();
        Ok(accounts)
    }

    /// Immutable settings for a job on `exchange` exporting `data_type`
    pub fn job_settings(&self, exchange: &str, data_type: DataType) -> Result<JobSettings, ConfigError> {
        let registry = ExchangeRegistry::load().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let entry = registry.get(exchange)?;
        let limits = registry.validate(exchange, data_type)?;
        let overrides = self.exchanges.get(exchange);

        let max_window_span_ms = overrides
            .and_then(|e| e.max_window_hours)
            .map(|hours| i64::from(hours) * MS_PER_HOUR)
            .unwrap_or_else(|| limits.max_window_span_ms());

        let mut rate_limit = entry.rate_limit().to_settings();
        if let Some(config) = overrides.map(|e| e.rate_limit) {
            if let Some(requests) = config.max_requests_per_minute {
                rate_limit.max_requests = requests;
            }
            if let Some(weight) = config.max_weight_per_minute {
                rate_limit.max_weight = Some(weight);
            }
        }

        let settings = JobSettings {
            rate_limit,
            max_window_span_ms,
            retry: self.retry.policy(),
            acquire_timeout: Duration::from_secs(self.global.acquire_timeout_secs),
        };
        settings
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{exchange} {data_type}: {e}")))?;
        Ok(settings)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.concurrency == 0 {
            return Err(ConfigError::Invalid("global.concurrency must be positive".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }

        let registry = ExchangeRegistry::load().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for (name, exchange) in &self.exchanges {
            registry.get(name)?;
            if exchange.max_window_hours == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "exchanges.{name}.max_window_hours must be positive"
                )));
            }
            let mut seen = HashSet::new();
            for account in &exchange.accounts {
                check_name("account", &account.name)
                    .map_err(|e| ConfigError::Invalid(format!("exchanges.{name}: {e}")))?;
                if !seen.insert(account.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "exchanges.{name}: duplicate account {}",
                        account.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut value: toml::Value =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        resolve_env_vars(&mut value);
        let config: Config = value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Replace every `${VAR}` string with the value of `VAR`, if set
fn resolve_env_vars(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                if let Ok(resolved) = std::env::var(name) {
                    *s = resolved;
                }
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(resolve_env_vars),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| resolve_env_vars(v)),
        _ => {}
    }
}
