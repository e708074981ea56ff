use serde_json::Value;

/// Field name the store refuses to persist.
pub const RESERVED_KEY: &str = "$";

/// Stand-in persisted for [`RESERVED_KEY`].
pub const ESCAPED_KEY: &str = "_$";

/// Rename every field called `key` to `by_key`, at any depth.
///
/// Objects nested inside arrays are visited too.
pub fn replace_keys(value: &mut Value, key: &str, by_key: &str) {
    match value {
        Value::Object(map) => {
            if let Some(inner) = map.remove(key) {
                map.insert(by_key.to_string(), inner);
            }

            for inner in map.values_mut() {
                replace_keys(inner, key, by_key);
            }
        }
        Value::Array(items) => {
            for inner in items {
                replace_keys(inner, key, by_key);
            }
        }
        _ => {}
    }
}

/// Make `value` safe to persist.
pub fn escape(value: &mut Value) {
    replace_keys(value, RESERVED_KEY, ESCAPED_KEY);
}

/// Undo [`escape`].
pub fn unescape(value: &mut Value) {
    replace_keys(value, ESCAPED_KEY, RESERVED_KEY);
}
