//! Bridge between `serde_json` documents and [`Value`].

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Convert a decoded JSON document into a [`Value`].
///
/// Object keys become text keys and arrays keep their order. Numbers that
/// fit an `i64` become integers; any other number (fractions, exponents,
/// unsigned values above `i64::MAX`) is kept as its decimal text so that
/// nothing the server sent is lost. Whether such a value is acceptable is
/// decided by whoever maps it onto a typed attribute.
///
/// # Errors
///
/// Currently infallible for documents `serde_json` produced; the result type
/// is kept for symmetry with the CBOR decoder.
pub fn from_json(json: &Json) -> CodecResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => number_from(n),
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::Array(
            items
                .iter()
                .map(from_json)
                .collect::<CodecResult<Vec<_>>>()?,
        ),
        Json::Object(fields) => {
            let mut pairs = Vec::with_capacity(fields.len());
            for (key, value) in fields {
                pairs.push((Value::Text(key.clone()), from_json(value)?));
            }
            Value::map(pairs)
        }
    })
}

/// Parse JSON text straight into a [`Value`].
///
/// # Errors
///
/// Fails if the text is not JSON.
pub fn parse_json(text: &str) -> CodecResult<Value> {
    let json: Json = serde_json::from_str(text)
        .map_err(|e| CodecError::invalid_structure(format!("invalid JSON: {e}")))?;
    from_json(&json)
}

/// Convert a [`Value`] into a JSON document.
///
/// Byte strings become arrays of numbers. Non-text map keys are rendered
/// with their JSON text form so every map still becomes an object.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::Number(Number::from(*n)),
        Value::Bytes(bytes) => Json::Array(
            bytes
                .iter()
                .map(|b| Json::Number(Number::from(*b)))
                .collect(),
        ),
        Value::Text(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => {
            let mut object = JsonMap::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = match key {
                    Value::Text(s) => s.clone(),
                    other => to_json(other).to_string(),
                };
                object.insert(key, to_json(value));
            }
            Json::Object(object)
        }
    }
}

fn number_from(n: &Number) -> Value {
    match n.as_i64() {
        Some(i) => Value::Integer(i),
        None => Value::Text(n.to_string()),
    }
}
