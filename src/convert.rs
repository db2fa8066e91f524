//! JSON <-> expression Value conversion utilities

use crate::value::{Value, Variables};

/// Convert a scalar serde_json::Value. Arrays and objects have no direct
/// counterpart and become their compact JSON text.
pub fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::String(s),
        compound => Value::String(compound.to_string()),
    }
}

/// Convert a Value to serde_json::Value. Non-finite floats become null.
pub fn value_to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s),
        Value::Domain(d) => serde_json::Value::String(d.name),
    }
}

/// Flattens a JSON document into dotted variable names.
///
/// # Examples
///
/// ```
/// use expr_engine::convert::flatten_json;
/// use expr_engine::Value;
///
/// let doc = serde_json::json!({ "player": { "level": 12, "tags": ["vip"] } });
/// let vars = flatten_json(&doc);
/// assert_eq!(vars["player.level"], Value::Integer(12));
/// assert_eq!(vars["player.tags.0"], Value::from("vip"));
/// ```
pub fn flatten_json(document: &serde_json::Value) -> Variables {
    let mut variables = Variables::new();
    flatten_into(document, String::new(), &mut variables);
    variables
}

fn flatten_into(node: &serde_json::Value, path: String, out: &mut Variables) {
    let join = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        }
    };

    match node {
        serde_json::Value::Object(obj) => {
            for (key, child) in obj {
                flatten_into(child, join(key), out);
            }
        }
        serde_json::Value::Array(arr) => {
            for (index, child) in arr.iter().enumerate() {
                flatten_into(child, join(&index.to_string()), out);
            }
        }
        scalar => {
            if !path.is_empty() {
                out.insert(path, json_to_value(scalar.clone()));
            }
        }
    }
}
