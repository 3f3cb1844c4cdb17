use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::clock::EpochMs;

/// Realtime payloads delivered over the push channel.
pub mod push;
/// Full mission state returned by the snapshot endpoint.
pub mod snapshot;

/// Parse an absolute instant sent either as an RFC 3339 string or as epoch milliseconds.
///
/// Numbers outside the calendar range `time` can represent are rejected.
pub fn parse_instant(value: &Value) -> Option<EpochMs> {
    let ms = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|ms| ms.is_finite()).map(|ms| ms as EpochMs)),
        Value::String(text) => parse_rfc3339(text),
        _ => None,
    }?;
    is_representable(ms).then_some(ms)
}

fn is_representable(ms: EpochMs) -> bool {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).is_ok()
}

/// Parse an RFC 3339 string into epoch milliseconds.
pub fn parse_rfc3339(text: &str) -> Option<EpochMs> {
    OffsetDateTime::parse(text.trim(), &Rfc3339)
        .ok()
        .map(|instant| (instant.unix_timestamp_nanos() / 1_000_000) as EpochMs)
}

/// Render epoch milliseconds as RFC 3339 for logs.
pub fn format_instant(ms: EpochMs) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|instant| instant.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
