//! Canonical record normalization
//!
//! A [`SchemaNormalizer`] is a pure mapping from one adapter-native
//! [`RawRecord`] to one [`NormalizedRecord`]. There is one normalizer per
//! exchange and data type; [`for_exchange`] selects it.
//!
//! Normalizers never guess: a missing field, an unparseable number or an
//! enumeration value outside the canonical vocabulary is a
//! [`SchemaValidationError`], never a silent default.

use crate::fetcher::RawRecord;
use crate::{DataType, NormalizedRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

pub mod binance_pm;

/// Record shape did not match what the normalizer expects
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    /// Required field absent or null
    #[error("missing field '{0}'")]
    MissingField(String),

    /// Field present but not parseable
    #[error("invalid value for '{field}': {value} ({reason})")]
    InvalidField {
        /// Field name
        field: String,
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Enumeration value outside the known vocabulary
    #[error("unknown {field} value '{value}'")]
    UnknownValue {
        /// Field name
        field: String,
        /// Offending value
        value: String,
    },

    /// Timestamp outside the representable range
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// Identity of the job a record is normalized for
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    /// Exchange name
    pub exchange: &'a str,
    /// Account name
    pub account: &'a str,
    /// Data type
    pub data_type: DataType,
}

/// Maps raw records of one exchange and data type into the canonical schema
pub trait SchemaNormalizer: Send + Sync {
    /// Data type this normalizer handles
    fn data_type(&self) -> DataType;

    /// Normalize one record
    fn normalize(
        &self,
        ctx: &RecordContext<'_>,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, SchemaValidationError>;
}

/// Normalizer for `exchange` and `data_type`, if one exists
pub fn for_exchange(exchange: &str, data_type: DataType) -> Option<Box<dyn SchemaNormalizer>> {
    match exchange {
        crate::fetcher::binance_pm::EXCHANGE_NAME => Some(binance_pm::normalizer(data_type)),
        _ => None,
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`
pub fn format_datetime(timestamp_ms: i64) -> Result<String, SchemaValidationError> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .ok_or(SchemaValidationError::InvalidTimestamp(timestamp_ms))
}

/// Deterministic id for records without a stable exchange-native id.
///
/// `{timestamp}:{account}:{data_type}:{amount}` plus an optional qualifier
/// (asset or symbol). The amount is normalized so `1.50` and `1.5` agree.
pub fn composite_id(
    timestamp: i64,
    account: &str,
    data_type: DataType,
    amount: Decimal,
    qualifier: Option<&str>,
) -> String {
    let mut id = format!("{timestamp}:{account}:{data_type}:{}", amount.normalize());
    if let Some(qualifier) = qualifier {
        id.push(':');
        id.push_str(qualifier);
    }
    id
}

/// Required string field (numbers are rendered as strings)
pub(crate) fn str_field(payload: &Value, field: &str) -> Result<String, SchemaValidationError> {
    opt_str_field(payload, field)?.ok_or_else(|| SchemaValidationError::MissingField(field.to_string()))
}

/// Optional string field; empty strings count as absent
pub(crate) fn opt_str_field(
    payload: &Value,
    field: &str,
) -> Result<Option<String>, SchemaValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SchemaValidationError::InvalidField {
            field: field.to_string(),
            value: other.to_string(),
            reason: "expected a scalar".to_string(),
        }),
    }
}

/// Required decimal field, parsed exactly from its textual form
pub(crate) fn decimal_field(payload: &Value, field: &str) -> Result<Decimal, SchemaValidationError> {
    opt_decimal_field(payload, field)?
        .ok_or_else(|| SchemaValidationError::MissingField(field.to_string()))
}

/// Optional decimal field
pub(crate) fn opt_decimal_field(
    payload: &Value,
    field: &str,
) -> Result<Option<Decimal>, SchemaValidationError> {
    let Some(text) = opt_str_field(payload, field)? else {
        return Ok(None);
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(|e| SchemaValidationError::InvalidField {
            field: field.to_string(),
            value: text,
            reason: e.to_string(),
        })
}

/// Required integer field (number or numeric string)
pub(crate) fn i64_field(payload: &Value, field: &str) -> Result<i64, SchemaValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(SchemaValidationError::MissingField(field.to_string())),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| SchemaValidationError::InvalidField {
            field: field.to_string(),
            value: n.to_string(),
            reason: "expected an integer".to_string(),
        }),
        Some(Value::String(s)) => s.parse().map_err(|_| SchemaValidationError::InvalidField {
            field: field.to_string(),
            value: s.clone(),
            reason: "expected an integer".to_string(),
        }),
        Some(other) => Err(SchemaValidationError::InvalidField {
            field: field.to_string(),
            value: other.to_string(),
            reason: "expected an integer".to_string(),
        }),
    }
}
