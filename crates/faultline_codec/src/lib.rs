//! # Faultline Codec
//!
//! Dynamic values plus the two encodings the engine needs: canonical CBOR
//! for stored records and a JSON bridge for remote response bodies.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (length-first, then bytewise on encoded keys)
//! - Integers use shortest encoding
//! - No floats, tags or indefinite-length items
//! - Strings must be UTF-8
//!
//! ## Usage
//!
//! ```
//! use faultline_codec::{from_cbor, parse_json, to_canonical_cbor, Value};
//!
//! let post = parse_json(r#"{"id": 42, "title": "Hello"}"#).unwrap();
//! assert_eq!(post.get("id"), Some(&Value::Integer(42)));
//!
//! let bytes = to_canonical_cbor(&post);
//! assert_eq!(from_cbor(&bytes).unwrap(), post);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;
mod value;

pub use cbor::{from_cbor, to_canonical_cbor};
pub use error::{CodecError, CodecResult};
pub use json::{from_json, parse_json, to_json};
pub use value::Value;

/// Types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Convert this value into its dynamic form.
    fn to_value(&self) -> Value;

    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> Vec<u8> {
        to_canonical_cbor(&self.to_value())
    }
}

/// Types that can be decoded from canonical CBOR.
pub trait Decode: Sized {
    /// Rebuild this type from its dynamic form.
    fn from_value(value: Value) -> CodecResult<Self>;

    /// Decode this type from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(from_cbor(bytes)?)
    }
}

impl Encode for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl Decode for Value {
    fn from_value(value: Value) -> CodecResult<Self> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            "[a-z]{0,8}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                    Value::object(m)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_bytes_are_stable(value in arb_value()) {
            let bytes = value.encode();
            let decoded = Value::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.encode(), bytes);
        }

        #[test]
        fn json_bridge_preserves_values_without_bytes(value in arb_value()) {
            fn has_bytes(v: &Value) -> bool {
                match v {
                    Value::Bytes(_) => true,
                    Value::Array(items) => items.iter().any(has_bytes),
                    Value::Map(pairs) => pairs.iter().any(|(_, v)| has_bytes(v)),
                    _ => false,
                }
            }
            prop_assume!(!has_bytes(&value));
            prop_assert_eq!(from_json(&to_json(&value)).unwrap(), value);
        }
    }
}
