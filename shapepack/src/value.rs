//! Untyped values
// (c) 2025 Ross Younger
//!
//! [`Value`] represents any single MessagePack structure without a
//! registered Rust type: the output of untyped deserialization and the input
//! of dynamic serialization. [`ValueMap`] preserves wire order for
//! enumeration while remapping every key *lookup* through integer widening,
//! because the same numeric key may arrive in several encoded widths.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::SystemTime;

/// Any single MessagePack structure.
#[derive(Debug, Clone, PartialEq, strum_macros::EnumIs)]
pub enum Value {
    /// The nil sentinel
    Nil,
    /// True or false
    Bool(bool),
    /// A negative integer
    Signed(i64),
    /// A non-negative integer
    Unsigned(u64),
    /// A 32-bit float
    F32(f32),
    /// A 64-bit float
    F64(f64),
    /// A UTF-8 string
    String(String),
    /// A binary blob
    Bytes(Vec<u8>),
    /// An array of values
    Array(Vec<Value>),
    /// A keyed map of values
    Map(ValueMap),
    /// A point in time (the timestamp extension)
    Timestamp(SystemTime),
    /// Any other extension: type code and raw payload
    Extension(i8, Vec<u8>),
}

// Ergonomic constructors ===================================================

macro_rules! value_from {
    ($variant:ident, $($t:ty),+) => {$(
        impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::$variant(value.into())
            }
        }
    )+}
}

value_from!(Unsigned, u8, u16, u32, u64);
value_from!(Signed, i8, i16, i32, i64);
value_from!(Bool, bool);
value_from!(F32, f32);
value_from!(F64, f64);
value_from!(String, String, &str);
value_from!(Bytes, Vec<u8>);
value_from!(Array, Vec<Value>);
value_from!(Map, ValueMap);
value_from!(Timestamp, SystemTime);

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Nil
    }
}

// Referencing and coercion =================================================

impl Value {
    /// The inner bool, if this is a boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The inner string slice, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The inner byte slice, if this is a binary blob
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The inner element slice, if this is an array
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The inner map, if this is a map
    #[must_use]
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Coerces to bool: integers map zero to false; everything else false
    #[must_use]
    pub fn coerce_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Unsigned(u) => *u != 0,
            Value::Signed(i) => *i != 0,
            _ => false,
        }
    }

    /// Coerces to i64: integers cast, booleans map to 0/1, the rest to 0
    #[must_use]
    pub fn coerce_signed(&self) -> i64 {
        #[allow(clippy::cast_possible_wrap)]
        match self {
            Value::Signed(i) => *i,
            Value::Unsigned(u) => *u as i64,
            Value::Bool(b) => i64::from(*b),
            _ => 0,
        }
    }

    /// Coerces to u64: integers cast, booleans map to 0/1, the rest to 0
    #[must_use]
    pub fn coerce_unsigned(&self) -> u64 {
        #[allow(clippy::cast_sign_loss)]
        match self {
            Value::Signed(i) => *i as u64,
            Value::Unsigned(u) => *u,
            Value::Bool(b) => u64::from(*b),
            _ => 0,
        }
    }
}

// Display ==================================================================

fn fmt_element(f: &mut std::fmt::Formatter<'_>, v: &Value) -> std::fmt::Result {
    match v {
        Value::String(s) => write!(f, "{s:?}"),
        _ => write!(f, "{v}"),
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Signed(i) => write!(f, "{i}"),
            Value::Unsigned(u) => write!(f, "{u}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_element(f, item)?;
                }
                f.write_char(']')
            }
            Value::Map(map) => write!(f, "{map}"),
            Value::Timestamp(t) => write!(f, "{t:?}"),
            Value::Extension(code, payload) => {
                write!(f, "ext({code}, 0x{})", hex::encode(payload))
            }
        }
    }
}

impl std::fmt::Display for ValueMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('{')?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt_element(f, k)?;
            f.write_str(": ")?;
            fmt_element(f, v)?;
        }
        f.write_char('}')
    }
}

// ValueMap =================================================================

/// A normalised lookup key: non-negative integers widen to u64, negative to
/// i64, so the encoded width of a numeric key is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Unsigned(u64),
    Signed(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl MapKey {
    fn normalize(value: &Value) -> Option<Self> {
        #[allow(clippy::cast_sign_loss)]
        match value {
            Value::Unsigned(u) => Some(MapKey::Unsigned(*u)),
            Value::Signed(i) if *i >= 0 => Some(MapKey::Unsigned(*i as u64)),
            Value::Signed(i) => Some(MapKey::Signed(*i)),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::String(s) => Some(MapKey::Str(s.clone())),
            Value::Bytes(b) => Some(MapKey::Bytes(b.clone())),
            // Floats, nil and aggregates are not indexable
            _ => None,
        }
    }
}

/// An order-preserving map of [`Value`]s with width-widening key lookups.
///
/// Enumeration yields entries exactly as they appeared on the wire;
/// [`get`](Self::get) remaps the key through the widening rules.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
    index: HashMap<MapKey, usize>,
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ValueMap {
    /// An empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts an entry, keeping first-occurrence position on key collision
    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(normalized) = MapKey::normalize(&key) {
            if let Some(&existing) = self.index.get(&normalized) {
                self.entries[existing].1 = value;
                return;
            }
            let _ = self.index.insert(normalized, self.entries.len());
        }
        self.entries.push((key, value));
    }

    /// Looks a key up through the widening rules
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        let normalized = MapKey::normalize(key)?;
        self.index.get(&normalized).map(|&i| &self.entries[i].1)
    }

    /// Enumerates entries in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{Value, ValueMap};
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_key_widening() {
        let mut map = ValueMap::new();
        // A u8-width key 5 and an i8-width key -1, as a decoder would insert
        map.insert(Value::Unsigned(5), Value::from("five"));
        map.insert(Value::Signed(-1), Value::from("minus one"));

        // Lookup by i64 5 widens to the unsigned class and matches
        assert_eq!(
            map.get(&Value::Signed(5)).and_then(Value::as_str),
            Some("five")
        );
        assert_eq!(
            map.get(&Value::Signed(-1)).and_then(Value::as_str),
            Some("minus one")
        );
        assert_eq!(map.get(&Value::Unsigned(7)), None);
    }

    #[test]
    fn enumeration_preserves_wire_order() {
        let mut map = ValueMap::new();
        map.insert(Value::from("z"), Value::from(1u8));
        map.insert(Value::from("a"), Value::from(2u8));
        let keys: Vec<_> = map.iter().filter_map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn duplicate_key_keeps_position_and_replaces_value() {
        let mut map = ValueMap::new();
        map.insert(Value::from("k"), Value::from(1u8));
        map.insert(Value::from("x"), Value::from(2u8));
        map.insert(Value::from("k"), Value::from(3u8));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Value::from("k")), Some(&Value::Unsigned(3)));
    }

    #[test]
    fn display_rendering() {
        let mut map = ValueMap::new();
        map.insert(Value::from("name"), Value::from("qcp"));
        map.insert(Value::from("port"), Value::from(853u16));
        let v = Value::from(vec![Value::Bool(true), Value::Map(map)]);
        assert_eq!(v.to_string(), r#"[true, {"name": "qcp", "port": 853}]"#);
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "0x0102");
        assert_eq!(Value::Nil.to_string(), "nil");
    }

    #[test]
    fn coercions() {
        assert!(Value::Signed(-1).coerce_bool());
        assert_eq!(Value::Unsigned(7).coerce_signed(), 7);
        assert_eq!(Value::Bool(true).coerce_unsigned(), 1);
        assert_eq!(Value::from("text").coerce_unsigned(), 0);
    }
}
