//! Dynamic values shared between frames, coroutines, and messages
//!
//! The runtime's data model is a small tagged variant. Cloning a [`Value`]
//! takes a new reference to the shared payload; dropping releases it. Handing
//! a value across a frame boundary or into an async completion is therefore
//! a plain `clone()`, and the release on every exit path is guaranteed by
//! ownership rather than by manual ref/unref bookkeeping.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The payload of a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueKind {
    /// The null/undefined value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A signed integer.
    Integer(i64),
    /// A double-precision float.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered sequence of values.
    Array(Vec<Value>),
    /// A string-keyed map of values.
    Object(BTreeMap<String, Value>),
}

/// A reference-counted dynamic value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value(Arc<ValueKind>);

impl Value {
    /// The null value.
    pub fn null() -> Self {
        Value(Arc::new(ValueKind::Null))
    }

    /// Make a boolean value.
    pub fn boolean(b: bool) -> Self {
        Value(Arc::new(ValueKind::Boolean(b)))
    }

    /// Make an integer value.
    pub fn integer(i: i64) -> Self {
        Value(Arc::new(ValueKind::Integer(i)))
    }

    /// Make a float value.
    pub fn number(n: f64) -> Self {
        Value(Arc::new(ValueKind::Number(n)))
    }

    /// Make a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value(Arc::new(ValueKind::String(s.into())))
    }

    /// Make an array value.
    pub fn array(items: Vec<Value>) -> Self {
        Value(Arc::new(ValueKind::Array(items)))
    }

    /// Make an object value.
    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        Value(Arc::new(ValueKind::Object(entries)))
    }

    /// Borrow the payload.
    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(*self.0, ValueKind::Null)
    }

    /// Borrow as a string constant, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is boolean `true`.
    pub fn is_true(&self) -> bool {
        matches!(*self.0, ValueKind::Boolean(true))
    }

    /// Borrow as an array, if this is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match &*self.0 {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up an object member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match &*self.0 {
            ValueKind::Object(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Forced cast to a signed integer.
    ///
    /// Floats truncate, booleans map to 0/1, and strings are parsed (decimal
    /// integer first, then float-with-truncation). `None` if the value has no
    /// integer rendition.
    pub fn cast_to_i64(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Integer(i) => Some(*i),
            ValueKind::Number(n) => Some(*n as i64),
            ValueKind::Boolean(b) => Some(i64::from(*b)),
            ValueKind::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|n| n as i64))
            }
            _ => None,
        }
    }

    /// Numeric-tolerant equality: integers and floats compare by magnitude,
    /// everything else by structure.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Integer(a), ValueKind::Number(b))
            | (ValueKind::Number(b), ValueKind::Integer(a)) => (*a as f64) == *b,
            _ => self == other,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Null => f.write_str("null"),
            ValueKind::Boolean(b) => write!(f, "{b}"),
            ValueKind::Integer(i) => write!(f, "{i}"),
            ValueKind::Number(n) => write!(f, "{n}"),
            ValueKind::String(s) => f.write_str(s),
            other => {
                // Composite values render as JSON.
                let text = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Value(Arc::new(ValueKind::deserialize(deserializer)?)))
    }
}

/// Evaluate an attribute literal into a value.
///
/// JSON literals (`2`, `true`, `[1,2]`, `"quoted"`) evaluate to the
/// corresponding value; anything else evaluates to itself as a string.
pub fn evaluate_literal(text: &str) -> Value {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v) => v,
        Err(_) => Value::string(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_evaluation() {
        assert_eq!(evaluate_literal("2"), Value::integer(2));
        assert_eq!(evaluate_literal("true"), Value::boolean(true));
        assert_eq!(evaluate_literal("hello"), Value::string("hello"));
        assert_eq!(
            evaluate_literal("[1, 2]"),
            Value::array(vec![Value::integer(1), Value::integer(2)])
        );
    }

    #[test]
    fn forced_integer_cast() {
        assert_eq!(Value::string(" 42 ").cast_to_i64(), Some(42));
        assert_eq!(Value::string("2.9").cast_to_i64(), Some(2));
        assert_eq!(Value::number(3.7).cast_to_i64(), Some(3));
        assert_eq!(Value::boolean(true).cast_to_i64(), Some(1));
        assert_eq!(Value::null().cast_to_i64(), None);
    }

    #[test]
    fn clone_shares_payload() {
        let a = Value::array(vec![Value::integer(1)]);
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn loose_equality_across_numeric_kinds() {
        assert!(Value::integer(1).loose_eq(&Value::number(1.0)));
        assert!(!Value::integer(1).loose_eq(&Value::number(1.5)));
        assert!(Value::string("1").loose_eq(&Value::string("1")));
        assert!(!Value::string("1").loose_eq(&Value::integer(1)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_literals_evaluate_to_integers(n in any::<i64>()) {
                prop_assert_eq!(evaluate_literal(&n.to_string()), Value::integer(n));
            }

            #[test]
            fn integer_strings_cast_back(n in any::<i64>()) {
                prop_assert_eq!(Value::string(n.to_string()).cast_to_i64(), Some(n));
            }
        }
    }
}
