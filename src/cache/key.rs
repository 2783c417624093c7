use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(params: &Value) -> String {
    let mut out = String::new();
    write_sorted(params, &mut out);
    out
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_sorted(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Cache key: operation name plus a 64-bit SipHash of the sorted JSON parameters.
/// Two parameter sets that collide share one slot (last writer wins).
pub fn cache_key(operation: &str, params: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    canonical_json(params).hash(&mut hasher);
    format!("{}:{:016x}", operation, hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_field_order() {
        let a: Value = serde_json::from_str(r#"{"branch":"main","sku":"layer-feed"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"sku":"layer-feed","branch":"main"}"#).unwrap();
        assert_eq!(cache_key("get_stock", &a), cache_key("get_stock", &b));
    }

    #[test]
    fn test_key_prefixed_with_operation() {
        let params = json!({"branch": "main"});
        let key = cache_key("forecast_stock", &params);
        assert!(key.starts_with("forecast_stock:"));
        assert_ne!(key, cache_key("get_stock", &params));
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = json!({"filter": {"z": 1, "a": 2}});
        assert_eq!(canonical_json(&a), r#"{"filter":{"a":2,"z":1}}"#);
    }
}
