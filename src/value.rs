//! The decoded-value tree: what a captured protobuf payload becomes once
//! the codec has walked it, with or without a schema.
//!
//! A `Value` never borrows from the registry or the wire bytes it was
//! built from — it's a fully owned snapshot, cheap to hand to a UI layer
//! or serialize straight to JSON.

use std::collections::BTreeMap;
use std::fmt;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    /// Every integer scalar (`int32`, `uint64`, `sint64`, fixed variants...)
    /// normalizes to one of these two, sign following the wire type.
    Int(i64),
    UInt(u64),
    /// 64-bit integers outside JavaScript's/JSON's safe-integer range
    /// (`2^53`) are carried as decimal strings so a JSON-consuming UI never
    /// silently loses precision; see `from_u64_precise`/`from_i64_precise`.
    BigInt(String),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// An enum value: the raw wire number plus its symbolic name when the
    /// registry could resolve it.
    Enum { number: i32, name: Option<String> },
    Message(MessageValue),
    Map(Vec<(MapKey, Value)>),
    Repeated(Vec<Value>),
    /// A field that failed to decode against its declared type; the record
    /// processor surfaces this without aborting the rest of the message.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(b) => write!(f, "{b}"),
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::UInt(u) => write!(f, "{u}"),
            MapKey::String(s) => write!(f, "{s}"),
        }
    }
}

/// A decoded message: its `$type` name (when known) plus its fields keyed
/// by name when a schema resolved them, or by raw field number otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageValue {
    pub type_name: Option<String>,
    fields: BTreeMap<FieldKey, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum FieldKey {
    Named(String),
    Number(i32),
}

impl MessageValue {
    pub fn new(type_name: Option<String>) -> Self {
        Self {
            type_name,
            fields: BTreeMap::new(),
        }
    }

    pub fn insert_named(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(FieldKey::Named(name.into()), value);
    }

    pub fn insert_unresolved(&mut self, number: i32, value: Value) {
        self.fields.insert(FieldKey::Number(number), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(&FieldKey::Named(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates fields in a stable order: named fields before unresolved
    /// ones, each group ordered by name/number.
    pub fn iter(&self) -> impl Iterator<Item = (FieldLabelRef<'_>, &Value)> {
        self.fields.iter().map(|(k, v)| {
            let label = match k {
                FieldKey::Named(name) => FieldLabelRef::Named(name),
                FieldKey::Number(n) => FieldLabelRef::Number(*n),
            };
            (label, v)
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldLabelRef<'a> {
    Named(&'a str),
    Number(i32),
}

impl fmt::Display for FieldLabelRef<'_> {
    /// An unresolved field's display key is `field_<n>`, not the bare
    /// number, whether it came from an unknown field on an otherwise
    /// resolved message or from a fully blind decode.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldLabelRef::Named(name) => write!(f, "{name}"),
            FieldLabelRef::Number(n) => write!(f, "field_{n}"),
        }
    }
}

impl Value {
    /// Wraps a raw 64-bit unsigned value, switching to [`Value::BigInt`]
    /// once it exceeds `2^53`, the largest integer a JSON number can carry
    /// without precision loss.
    pub fn from_u64_precise(v: u64) -> Value {
        const MAX_SAFE_INTEGER: u64 = (1u64 << 53) - 1;
        if v > MAX_SAFE_INTEGER {
            Value::BigInt(v.to_string())
        } else {
            Value::UInt(v)
        }
    }

    /// Same as [`Value::from_u64_precise`] but for signed 64-bit values.
    pub fn from_i64_precise(v: i64) -> Value {
        const MAX_SAFE_INTEGER: i64 = (1i64 << 53) - 1;
        const MIN_SAFE_INTEGER: i64 = -(1i64 << 53) + 1;
        if !(MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v) {
            Value::BigInt(v.to_string())
        } else {
            Value::Int(v)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}
