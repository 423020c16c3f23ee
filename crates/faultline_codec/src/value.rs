//! Dynamic value type shared by representations and stored records.

use std::cmp::Ordering;

/// A dynamic value.
///
/// Response bodies enter the engine already decoded into this shape, and
/// stored object records are built from it. There is no float variant, so
/// every value has exactly one canonical encoding; the JSON bridge keeps
/// non-integer numbers as their text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs, kept in canonical key order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with canonically sorted keys.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a map keyed by text from `(name, value)` pairs.
    ///
    /// ```
    /// use faultline_codec::Value;
    ///
    /// let post = Value::object([("id", Value::from(42)), ("title", Value::from("Hi"))]);
    /// assert_eq!(post.get("title").and_then(Value::as_text), Some("Hi"));
    /// ```
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// An empty map.
    pub fn empty_map() -> Self {
        Value::Map(Vec::new())
    }

    /// Compare two values by their canonical CBOR encoding.
    ///
    /// Canonical order is length-first, then bytewise.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let a = crate::cbor::to_canonical_cbor(self);
        let b = crate::cbor::to_canonical_cbor(other);
        a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
    }

    /// Short name of this value's kind, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Render a text or integer value as an identifier string.
    ///
    /// Remote APIs use both `"id": 42` and `"id": "42"`; both yield `"42"`.
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            Value::Text(s) if !s.is_empty() => Some(s.clone()),
            Value::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Look up a text key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }

    /// Returns true if this map contains the text key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a text key in this map value.
    ///
    /// Returns the previous value. Does nothing on non-map values.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let Value::Map(pairs) = self else {
            return None;
        };
        let key = Value::Text(key.into());
        if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        let at = pairs
            .binary_search_by(|(k, _)| k.cmp_canonical(&key))
            .unwrap_or_else(|i| i);
        pairs.insert(at, (key, value));
        None
    }

    /// Iterate over the text-keyed entries of a map value.
    ///
    /// Non-text keys are skipped; non-map values yield nothing.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.as_map()
            .unwrap_or(&[])
            .iter()
            .filter_map(|(k, v)| k.as_text().map(|k| (k, v)))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
