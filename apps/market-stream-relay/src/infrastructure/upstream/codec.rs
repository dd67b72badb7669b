//! Inbound Frame Codec
//!
//! Classifies provider text frames and reads message timestamps for the
//! staleness filter.
//!
//! - `ping` / `pong` literals are liveness frames and never forwarded.
//! - Anything else must be JSON; the raw text is kept so forwarding is
//!   byte-for-byte.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Epoch values above this are milliseconds rather than seconds.
const EPOCH_MILLIS_CUTOFF: f64 = 100_000_000_000.0;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary payload is not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Provider-initiated `ping`.
    Ping,
    /// Reply to our `ping`.
    Pong,
    /// A data payload.
    Data {
        /// The frame exactly as received.
        raw: String,
        /// Parsed JSON.
        value: Value,
    },
}

/// Decode a text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if the frame is neither a liveness literal nor
/// valid JSON.
pub fn decode(text: &str) -> Result<InboundFrame, CodecError> {
    match text.trim() {
        "ping" => Ok(InboundFrame::Ping),
        "pong" => Ok(InboundFrame::Pong),
        trimmed => {
            let value = serde_json::from_str(trimmed)?;
            Ok(InboundFrame::Data {
                raw: text.to_string(),
                value,
            })
        }
    }
}

/// Decode a binary frame as UTF-8 text.
///
/// # Errors
///
/// Returns `CodecError::NotUtf8` for non-UTF-8 data, otherwise as [`decode`].
pub fn decode_binary(data: &[u8]) -> Result<InboundFrame, CodecError> {
    let text = std::str::from_utf8(data).map_err(|_| CodecError::NotUtf8)?;
    decode(text)
}

/// Read the top-level `timestamp` field of a payload.
///
/// Accepts epoch seconds, epoch milliseconds (integer or float) and RFC 3339
/// strings. Returns `None` when absent or unreadable.
#[must_use]
pub fn message_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value.get("timestamp")? {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() || raw < 0.0 {
                return None;
            }
            let millis = if raw > EPOCH_MILLIS_CUTOFF {
                raw
            } else {
                raw * 1000.0
            };
            #[allow(clippy::cast_possible_truncation)]
            let millis = millis.round() as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Whether a payload is older than `threshold` at `now`.
///
/// Payloads without a timestamp are never stale. Timestamps in the future
/// (clock skew) are not stale either.
#[must_use]
pub fn is_stale(value: &Value, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(timestamp) = message_timestamp(value) else {
        return false;
    };
    now.signed_duration_since(timestamp)
        .to_std()
        .is_ok_and(|age| age > threshold)
}
