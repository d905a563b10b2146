//! Dynamic attribute values and hashable join keys.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically-typed attribute value.
///
/// Entities carry their attributes as `Value`s and the execution
/// collaborator exchanges them through [`Row`](crate::Row)s and filter
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) | Value::Timestamp(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to borrow this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Integers and doubles compare numerically with each other. NULL sorts
    /// before everything. Values of unrelated types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) | (Value::Timestamp(a), Value::Timestamp(b)) => {
                Some(a.cmp(b))
            }
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::BigInt(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::BigInt(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::BigInt(i) | Value::Timestamp(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => {
                for byte in u {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A join key: a non-NULL value usable as a hash-map key.
///
/// Parents are matched to related rows by comparing the parent's local key
/// with the child's foreign key. `Key` gives `Value` the `Eq + Hash` it needs
/// for that, hashing floats by bit pattern and JSON by its serialized form.
/// NULL never forms a key.
///
/// Integral doubles are stored as `BigInt`, so a key matches the same rows
/// that [`Value::compare`] considers equal: `BigInt(1)` and `Double(1.0)`
/// form one key.
#[derive(Debug, Clone)]
pub struct Key(Value);

impl Key {
    /// Build a key from a value. Returns `None` for NULL.
    pub fn new(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Double(d) => Some(Self(integral(d).map_or(Value::Double(d), Value::BigInt))),
            other => Some(Self(other)),
        }
    }

    /// Borrow the underlying value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Unwrap into the underlying value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The integer a double holds exactly, if any.
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
fn integral(d: f64) -> Option<i64> {
    let in_range = d >= i64::MIN as f64 && d < i64::MAX as f64;
    (in_range && d.fract() == 0.0).then(|| d as i64)
}

/// Hash a single Value into the hasher, tagging each variant.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            5u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Timestamp(ts) => {
            6u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            7u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            8u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_rejects_null() {
        assert!(Key::new(Value::Null).is_none());
        assert!(Key::new(Value::BigInt(0)).is_some());
    }

    #[test]
    fn test_key_hash_distinguishes_types() {
        let mut set = HashSet::new();
        set.insert(Key::new(Value::BigInt(42)).unwrap());
        set.insert(Key::new(Value::Text("42".to_string())).unwrap());
        set.insert(Key::new(Value::BigInt(42)).unwrap());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_key_double_equality_by_bits() {
        let a = Key::new(Value::Double(1.5)).unwrap();
        let b = Key::new(Value::Double(1.5)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_matches_integral_doubles() {
        let int = Key::new(Value::BigInt(1)).unwrap();
        let double = Key::new(Value::Double(1.0)).unwrap();
        assert_eq!(int, double);

        let mut set = HashSet::new();
        set.insert(int);
        set.insert(double);
        set.insert(Key::new(Value::Double(-0.0)).unwrap());
        set.insert(Key::new(Value::BigInt(0)).unwrap());
        assert_eq!(set.len(), 2);

        assert_eq!(
            Key::new(Value::Double(1.5)).unwrap().into_value(),
            Value::Double(1.5)
        );
        assert_eq!(
            Key::new(Value::Double(f64::NAN)).map(|k| k.value().type_name()),
            Some("DOUBLE")
        );
    }

    #[test]
    fn test_compare_mixed_numeric() {
        assert_eq!(
            Value::BigInt(2).compare(&Value::Double(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.compare(&Value::BigInt(1)), Some(Ordering::Less));
        assert_eq!(Value::Text("a".into()).compare(&Value::BigInt(1)), None);
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(7_i64)), Value::BigInt(7));
    }
}
