//! Exchange registry
//!
//! The registry lists every supported exchange with the data types it can
//! export, the widest window its history endpoints accept per data type and
//! its default rate budget. Configuration falls back to these values.

use crate::downloader::config::RateLimitSettings;
use crate::DataType;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("exchanges.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<ExchangeRegistry, RegistryError>> =
    Lazy::new(|| ExchangeRegistry::from_json(REGISTRY_JSON));

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Registry of supported exchanges
#[derive(Debug, Clone)]
pub struct ExchangeRegistry {
    schema_version: String,
    entries: BTreeMap<String, ExchangeEntry>,
}

impl ExchangeRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse registry from JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut entries = BTreeMap::new();
        for entry in raw.exchanges {
            for limits in &entry.data_types {
                if limits.max_window_hours == 0 {
                    return Err(RegistryError::ParseError(format!(
                        "{} {}: max_window_hours must be positive",
                        entry.name, limits.data_type
                    )));
                }
            }
            entries.insert(entry.name.clone(), entry);
        }

        Ok(Self {
            schema_version: raw.schema_version,
            entries,
        })
    }

    /// Registry schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// All exchanges, sorted by name
    pub fn entries(&self) -> impl Iterator<Item = &ExchangeEntry> {
        self.entries.values()
    }

    /// Entry for `exchange`
    pub fn get(&self, exchange: &str) -> Result<&ExchangeEntry, RegistryError> {
        self.entries
            .get(exchange)
            .ok_or_else(|| RegistryError::NotFound(exchange.to_string()))
    }

    /// Check `exchange` exists and exports `data_type`
    pub fn validate(&self, exchange: &str, data_type: DataType) -> Result<&DataTypeLimits, RegistryError> {
        self.get(exchange)?
            .limits(data_type)
            .ok_or_else(|| RegistryError::Unsupported {
                exchange: exchange.to_string(),
                data_type,
            })
    }
}

/// A single exchange in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeEntry {
    name: String,
    description: String,
    rate_limit: RateLimitDefaults,
    data_types: Vec<DataTypeLimits>,
}

impl ExchangeEntry {
    /// Exchange name used in configuration, job ids and paths
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Default rate budget
    pub fn rate_limit(&self) -> &RateLimitDefaults {
        &self.rate_limit
    }

    /// Supported data types with their limits
    pub fn data_types(&self) -> &[DataTypeLimits] {
        &self.data_types
    }

    /// Limits for `data_type`, if supported
    pub fn limits(&self, data_type: DataType) -> Option<&DataTypeLimits> {
        self.data_types.iter().find(|l| l.data_type == data_type)
    }

    /// Whether `data_type` can be exported
    pub fn supports(&self, data_type: DataType) -> bool {
        self.limits(data_type).is_some()
    }
}

/// Default rate budget of an exchange, per minute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    /// Requests per minute
    pub max_requests_per_minute: u32,
    /// Request weight per minute, if the exchange meters weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_weight_per_minute: Option<u32>,
}

impl RateLimitDefaults {
    /// Governor settings for this budget
    pub fn to_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: self.max_requests_per_minute,
            max_weight: self.max_weight_per_minute,
            interval: Duration::from_secs(60),
        }
    }
}

/// Limits of one data type on one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeLimits {
    /// Data type
    pub data_type: DataType,
    /// Widest window a history endpoint accepts
    pub max_window_hours: u32,
    /// Whether records carry a stable exchange-native id
    #[serde(default)]
    pub native_ids: bool,
}

impl DataTypeLimits {
    /// Maximum window span in milliseconds
    pub fn max_window_span_ms(&self) -> i64 {
        i64::from(self.max_window_hours) * MS_PER_HOUR
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    #[allow(dead_code)]
    last_updated: String,
    exchanges: Vec<ExchangeEntry>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Exchange not in the registry
    #[error("unknown exchange: {0}")]
    NotFound(String),

    /// Exchange exists but cannot export the data type
    #[error("{exchange} does not support {data_type}")]
    Unsupported {
        /// Exchange name
        exchange: String,
        /// Requested data type
        data_type: DataType,
    },
}
