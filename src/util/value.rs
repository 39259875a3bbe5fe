//! JSON value helpers shared by the data model, evaluator and resolver

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Human-readable JSON type name (for errors and logs)
pub fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Loose truthiness: `null`, `false`, `0`, `""` and NaN-like numbers are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form used when a value is interpolated into text
pub fn to_display_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

/// Numeric coercion: `null`/`""` → 0, booleans → 0/1, unparsable → NaN
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// JSON number for `n`; integral values stay integers, non-finite become `null`
pub fn number_value(n: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Read a nested object path
pub fn get_in<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate objects.
///
/// An empty path replaces the target. Non-object intermediates are replaced
/// by objects.
pub fn set_in(target: Option<Value>, path: &[String], value: Value) -> Value {
    let Some((first, rest)) = path.split_first() else {
        return value;
    };

    let mut map = match target {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let existing = map.remove(first);
    map.insert(first.clone(), set_in(existing, rest, value));
    Value::Object(map)
}

/// Append `items` to the array found at `path` (creating it if absent)
pub fn append_in(target: Option<Value>, path: &[String], items: Vec<Value>) -> Value {
    let existing = target
        .as_ref()
        .and_then(|t| get_in(t, path))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut merged = existing;
    merged.extend(items);
    set_in(target, path, Value::Array(merged))
}
