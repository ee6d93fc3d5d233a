//! Telemetry message codec
//!
//! Turns a raw broker payload into a [`TelemetryEvent`]. Decoding is pure:
//! no I/O, no side effects, so a failed payload can be logged and dropped.
//!
//! Wire shape (UTF-8 JSON):
//!
//! ```text
//! {"type_object": "planet", "name": "Timber Hearth",
//!  "x": 1.0, "y": 2.0, "z": 3.0, "timestamp": 1700000000000}
//! ```
//!
//! Coordinates may arrive as numbers or numeric strings; `timestamp` as an
//! integer, an integral float, or an integer string. Extra fields are ignored.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Maximum number of payload bytes kept for diagnostics
pub const PREVIEW_LIMIT: usize = 256;

/// One decoded telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type_object")]
    pub entity_kind: String,
    #[serde(rename = "name")]
    pub entity_name: String,
    #[serde(deserialize_with = "coordinate")]
    pub x: f64,
    #[serde(deserialize_with = "coordinate")]
    pub y: f64,
    #[serde(deserialize_with = "coordinate")]
    pub z: f64,
    #[serde(rename = "timestamp", deserialize_with = "epoch_millis")]
    pub timestamp_ms: i64,
    /// `timestamp_ms` as an instant; filled in and range-checked by [`decode`]
    #[serde(skip)]
    sample_time: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn sample_time(&self) -> DateTime<Utc> {
        self.sample_time
    }
}

/// Bounded copy of a rejected payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPreview {
    bytes: Vec<u8>,
    total_len: usize,
}

impl PayloadPreview {
    pub fn capture(payload: &[u8]) -> Self {
        Self {
            bytes: payload[..payload.len().min(PREVIEW_LIMIT)].to_vec(),
            total_len: payload.len(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn is_truncated(&self) -> bool {
        self.total_len > self.bytes.len()
    }
}

impl fmt::Display for PayloadPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))?;
        if self.is_truncated() {
            write!(f, "... (+{} bytes)", self.total_len - self.bytes.len())?;
        }
        Ok(())
    }
}

/// Payload that cannot be turned into a [`TelemetryEvent`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not valid UTF-8: {source}")]
    InvalidUtf8 {
        source: std::str::Utf8Error,
        payload: PayloadPreview,
    },

    #[error("malformed telemetry payload: {source}")]
    Malformed {
        source: serde_json::Error,
        payload: PayloadPreview,
    },

    #[error("timestamp {timestamp_ms} ms is outside the representable range")]
    TimestampOutOfRange {
        timestamp_ms: i64,
        payload: PayloadPreview,
    },
}

impl DecodeError {
    /// The offending payload prefix, if there was one.
    pub fn payload(&self) -> Option<&PayloadPreview> {
        match self {
            DecodeError::Empty => None,
            DecodeError::InvalidUtf8 { payload, .. }
            | DecodeError::Malformed { payload, .. }
            | DecodeError::TimestampOutOfRange { payload, .. } => Some(payload),
        }
    }
}

/// Decode a raw broker payload.
pub fn decode(payload: &[u8]) -> Result<TelemetryEvent, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    let text = std::str::from_utf8(payload).map_err(|source| DecodeError::InvalidUtf8 {
        source,
        payload: PayloadPreview::capture(payload),
    })?;

    let mut event: TelemetryEvent =
        serde_json::from_str(text).map_err(|source| DecodeError::Malformed {
            source,
            payload: PayloadPreview::capture(payload),
        })?;

    event.sample_time = DateTime::<Utc>::from_timestamp_millis(event.timestamp_ms).ok_or_else(
        || DecodeError::TimestampOutOfRange {
            timestamp_ms: event.timestamp_ms,
            payload: PayloadPreview::capture(payload),
        },
    )?;

    Ok(event)
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => {
            return Err(de::Error::invalid_type(
                unexpected(other),
                &"a number or numeric string",
            ))
        }
    };

    match parsed {
        Some(value) if value.is_finite() => Ok(value),
        Some(_) => Err(de::Error::custom("coordinate must be finite")),
        None => Err(de::Error::invalid_value(
            unexpected(&raw),
            &"a number or numeric string",
        )),
    }
}

fn epoch_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        other => {
            return Err(de::Error::invalid_type(
                unexpected(other),
                &"an integer number of milliseconds",
            ))
        }
    };

    parsed.ok_or_else(|| {
        de::Error::invalid_value(unexpected(&raw), &"an integer number of milliseconds")
    })
}
