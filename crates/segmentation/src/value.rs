//! Coercions applied to record values and condition values before comparing.
//!
//! A coercion either succeeds, yields an unmatchable value (`None` for
//! numbers and dates behaves like NaN), or fails with [`Uncoercible`] when the
//! input has a shape the operator cannot work with at all.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::rules::ConditionValue;

/// Input that cannot be turned into the operand an operator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Uncoercible(pub String);

pub fn json_text(value: &Value) -> Result<String, Uncoercible> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(number_text(n)),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Uncoercible(format!("cannot read {other} as text"))),
    }
}

fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        n.as_f64().map(|f| f.to_string()).unwrap_or_default()
    }
}

/// Lower-cased text form used by every text operator.
pub fn folded_text(value: &Value) -> Result<String, Uncoercible> {
    json_text(value).map(|s| s.to_lowercase())
}

pub fn json_number(value: &Value) -> Result<Option<f64>, Uncoercible> {
    match value {
        Value::Number(n) => Ok(n.as_f64().filter(|f| !f.is_nan())),
        Value::String(s) => Ok(parse_number(s)),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        other => Err(Uncoercible(format!("cannot read {other} as a number"))),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| !f.is_nan())
}

pub fn json_date(value: &Value) -> Result<Option<DateTime<Utc>>, Uncoercible> {
    match value {
        Value::String(s) => Ok(parse_date(s)),
        // Epoch milliseconds, as stored by the record importer for timestamps.
        Value::Number(n) => Ok(n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)),
        other => Err(Uncoercible(format!("cannot read {other} as a date"))),
    }
}

/// Accepts `YYYY-MM-DD`, RFC 3339, and naive `YYYY-MM-DDTHH:MM:SS[.f]`.
/// Date-only values are midnight UTC.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl ConditionValue {
    pub fn as_json(&self) -> Value {
        Value::from(self.clone())
    }

    pub fn folded_text(&self) -> Result<String, Uncoercible> {
        match self {
            Self::Text(s) => Ok(s.to_lowercase()),
            Self::Number(n) => Ok(n.to_string()),
            Self::List(_) | Self::Other(_) => folded_text(&self.as_json()),
        }
    }

    pub fn number(&self) -> Result<Option<f64>, Uncoercible> {
        match self {
            Self::Number(n) => Ok(Some(*n).filter(|f| !f.is_nan())),
            Self::Text(s) => Ok(parse_number(s)),
            Self::List(_) | Self::Other(_) => json_number(&self.as_json()),
        }
    }

    pub fn date(&self) -> Result<Option<DateTime<Utc>>, Uncoercible> {
        json_date(&self.as_json())
    }

    /// `(start, end)` of a `between` condition: a two-element list, or a
    /// string with exactly one comma. `None` for any other shape.
    pub fn range_bounds(&self) -> Option<(String, String)> {
        match self {
            Self::List(items) if items.len() == 2 => {
                let start = json_text(&items[0]).ok()?;
                let end = json_text(&items[1]).ok()?;
                Some((start, end))
            }
            Self::Text(s) => {
                let parts: Vec<&str> = s.split(',').collect();
                match parts.as_slice() {
                    [start, end] => Some((start.trim().to_string(), end.trim().to_string())),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}
