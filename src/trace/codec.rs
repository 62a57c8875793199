//! Text encoding of opaque trace payloads.
//!
//! Writing is lossless for any JSON value. Reading never fails: absent,
//! blank or corrupted text comes back as `Value::Null`.

use serde_json::Value;
use tracing::warn;

/// Serialize a payload for storage. `Null` is stored as SQL `NULL`.
pub fn encode(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "payload could not be serialized, storing nothing");
            None
        }
    }
}

/// Deserialize a stored payload.
pub fn decode(text: Option<&str>) -> Value {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return Value::Null;
    };
    serde_json::from_str(text).unwrap_or(Value::Null)
}
