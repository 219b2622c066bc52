//! JSON codec between cell values and persisted strings.
//!
//! Decoding never fails: an absent entry or a string that is not valid JSON
//! becomes [`NO_VALUE`] (`null`). Encoding a [`Value`] cannot fail either;
//! only the typed helper [`to_raw`] can, for types whose `Serialize` impl
//! rejects the value.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Sentinel for "nothing usable was stored".
pub const NO_VALUE: Value = Value::Null;

/// Compact JSON text for `value`.
#[must_use]
pub fn encode(value: &Value) -> String {
    value.to_string()
}

/// Parse a persisted string, mapping absent or malformed input to
/// [`NO_VALUE`].
#[must_use]
pub fn decode(raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return NO_VALUE;
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, len = raw.len(), "malformed persisted value; using no-value sentinel");
            NO_VALUE
        }
    }
}

/// Convert a typed value into its raw JSON representation.
pub fn to_raw<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn absent_is_no_value() {
        assert_eq!(decode(None), NO_VALUE);
    }

    #[test]
    fn malformed_is_no_value() {
        for raw in ["", "{", "undefined", "{'a':1}", "[1,]", "\"unterminated"] {
            assert_eq!(decode(Some(raw)), NO_VALUE, "input {raw:?}");
        }
    }

    #[test]
    fn object_decodes() {
        assert_eq!(decode(Some(r#"{"a":1}"#)), json!({"a": 1}));
    }

    #[test]
    fn encode_is_compact_json() {
        assert_eq!(encode(&json!({"a": 2})), r#"{"a":2}"#);
        assert_eq!(encode(&json!("x")), r#""x""#);
        assert_eq!(encode(&NO_VALUE), "null");
    }

    #[test]
    fn to_raw_rejects_non_string_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], 1);
        assert!(to_raw(&map).is_err());
        assert_eq!(to_raw(&("a", 1)).unwrap(), json!(["a", 1]));
    }
}
