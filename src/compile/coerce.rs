//! Type coercion
//!
//! Only narrow, well-defined conversions are made. The declared types are
//! tried in order and the first conversion that applies wins.

use serde_json::{Number, Value};

use crate::canonical::JsonType;
use crate::config::CoerceTypes;

/// Coerce a value towards one of the declared types.
///
/// Returns `None` when the value already has a declared type or no rule applies.
pub fn coerce(value: &Value, types: &[JsonType], mode: CoerceTypes) -> Option<Value> {
    if mode == CoerceTypes::Off || types.iter().any(|t| t.matches(value)) {
        return None;
    }
    if mode == CoerceTypes::Array {
        if let Value::Array(items) = value {
            // a one-element array may stand in for its element
            if items.len() == 1 {
                if let Some(inner) = types.iter().find_map(|t| to_scalar(&items[0], *t)) {
                    return Some(inner);
                }
            }
        }
    }
    for target in types {
        if let Some(converted) = to_scalar(value, *target) {
            return Some(converted);
        }
    }
    if mode == CoerceTypes::Array && types.contains(&JsonType::Array) && !value.is_array() {
        return Some(Value::Array(vec![value.clone()]));
    }
    None
}

fn to_scalar(value: &Value, target: JsonType) -> Option<Value> {
    if target.matches(value) {
        return Some(value.clone());
    }
    match target {
        JsonType::Number | JsonType::Integer => to_number(value, target == JsonType::Integer),
        JsonType::String => match value {
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            Value::Null => Some(Value::String(String::new())),
            _ => None,
        },
        JsonType::Boolean => match value {
            Value::String(s) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" | "" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) if n.as_f64() == Some(1.0) => Some(Value::Bool(true)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Some(Value::Bool(false)),
            Value::Null => Some(Value::Bool(false)),
            _ => None,
        },
        JsonType::Null => match value {
            Value::String(s) if s.is_empty() => Some(Value::Null),
            Value::Number(n) if n.as_f64() == Some(0.0) => Some(Value::Null),
            Value::Bool(false) => Some(Value::Null),
            _ => None,
        },
        JsonType::Array | JsonType::Object => None,
    }
}

fn to_number(value: &Value, integer: bool) -> Option<Value> {
    let number = match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed != s {
                return None;
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                Number::from(i)
            } else {
                let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
                Number::from_f64(f)?
            }
        }
        Value::Bool(b) => Number::from(u8::from(*b)),
        Value::Null => Number::from(0),
        _ => return None,
    };
    if integer && !crate::canonical::is_integer(&number) {
        return None;
    }
    Some(Value::Number(number))
}
