//! Queue payload shapes understood by the sinks.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::SinkError;

/// Naive ISO-8601 layouts accepted besides RFC 3339. Interpreted as UTC.
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A ticker the upstream producers gave up on, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadTickerRecord {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl BadTickerRecord {
    /// Validates a `{"ticker", "timestamp", "reason"}` payload.
    ///
    /// All three fields are required and must be non-empty strings.
    pub fn from_payload(payload: &Value) -> Result<Self, SinkError> {
        let ticker = required_str(payload, "ticker")?;
        let reason = required_str(payload, "reason")?;
        let raw_timestamp = required_str(payload, "timestamp")?;
        let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
            SinkError::InvalidPayload(format!("unparseable timestamp '{}'", raw_timestamp))
        })?;

        Ok(Self {
            ticker: ticker.to_string(),
            timestamp,
            reason: reason.to_string(),
        })
    }
}

/// Static company data for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    pub ticker: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    /// Standard Industrial Classification code. Producers send it as text or as a number.
    #[serde(default, deserialize_with = "text_or_number")]
    pub sic: Option<String>,
}

impl FundamentalsRecord {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            ..Self::default()
        }
    }

    /// Validates a fundamentals payload. Only `ticker` is required; unknown keys are ignored.
    pub fn from_payload(payload: &Value) -> Result<Self, SinkError> {
        required_str(payload, "ticker")?;
        Self::deserialize(payload).map_err(|e| SinkError::InvalidPayload(e.to_string()))
    }
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, SinkError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(SinkError::InvalidPayload(
            format!("missing or empty '{}'", field),
        )),
        Some(other) => Err(SinkError::InvalidPayload(format!(
            "'{}' must be a string, got {}",
            field, other
        ))),
    }
}

/// Parses RFC 3339, naive date-times and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected text or number, got {}",
            other
        ))),
    }
}
