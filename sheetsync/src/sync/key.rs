use std::fmt;

use smartsheet_core::CellValue;
use thiserror::Error;

/// Canonical form of a match-column value. `12345`, `12345.0` and
/// `" 12345 "` all become `Integer(12345)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Integer(i64),
    /// Non-integral number, stored as its shortest round-trip decimal string.
    Decimal(String),
    Text(String),
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKey::Integer(value) => write!(f, "{value}"),
            MatchKey::Decimal(value) | MatchKey::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeyRejection {
    #[error("match cell is empty")]
    Empty,
    #[error("match value {0:?} looks numeric but does not parse")]
    Malformed(String),
    #[error("match value {0:?} is not a usable key")]
    Unsupported(String),
}

/// Total normalization over the raw cell value. Never logs.
pub fn classify(value: Option<&CellValue>) -> Result<MatchKey, KeyRejection> {
    match value {
        None => Err(KeyRejection::Empty),
        Some(CellValue::Integer(value)) => Ok(MatchKey::Integer(*value)),
        Some(CellValue::Decimal(value)) => from_float(*value),
        Some(CellValue::Text(text)) => from_text(text),
        Some(CellValue::Bool(value)) => Err(KeyRejection::Unsupported(value.to_string())),
    }
}

/// Like [`classify`], but logs a warning for rejected values.
pub fn normalize(value: Option<&CellValue>) -> Option<MatchKey> {
    match classify(value) {
        Ok(key) => Some(key),
        Err(rejection) => {
            tracing::warn!(raw = ?value, "could not derive match key: {rejection}");
            None
        }
    }
}

fn from_float(value: f64) -> Result<MatchKey, KeyRejection> {
    if !value.is_finite() {
        return Err(KeyRejection::Malformed(value.to_string()));
    }
    // i64::MIN is exactly representable, i64::MAX rounds up to 2^63
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return Ok(MatchKey::Integer(value as i64));
    }
    Ok(MatchKey::Decimal(value.to_string()))
}

fn from_text(raw: &str) -> Result<MatchKey, KeyRejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(KeyRejection::Empty);
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(MatchKey::Integer(value));
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        if value.is_finite() {
            return from_float(value);
        }
    }
    if looks_numeric(trimmed) {
        return Err(KeyRejection::Malformed(trimmed.to_string()));
    }
    Ok(MatchKey::Text(trimmed.to_string()))
}

/// Optional sign followed only by digits and dots, with at least one digit.
fn looks_numeric(value: &str) -> bool {
    let body = value.strip_prefix(['+', '-']).unwrap_or(value);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().any(|c| c.is_ascii_digit())
}
