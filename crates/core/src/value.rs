//! Field values
//!
//! A document field holds one of eight shapes. Equality is strict: an
//! `Int` never equals a `Float` of the same magnitude and a string never
//! equals its UTF-8 bytes. Floats compare the IEEE way, so `NaN` is unequal
//! to itself.
//!
//! Sorting and range checks need a total order across shapes; that lives in
//! [`crate::query::compare_values`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value
///
/// `Object` keeps its keys in a `BTreeMap` so equal documents encode to
/// identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Explicit absence
    Null,
    /// `true` or `false`
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE-754 double
    Float(f64),
    /// UTF-8 text
    String(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// Ordered list
    Array(Vec<Value>),
    /// String-keyed map
    Object(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(x), Bool(y)) => x == y,
            (Int(x), Int(y)) => x == y,
            (Float(x), Float(y)) => x == y,
            (String(x), String(y)) => x == y,
            (Bytes(x), Bytes(y)) => x == y,
            (Array(x), Array(y)) => x == y,
            (Object(x), Object(y)) => x == y,
            _ => false,
        }
    }
}

impl Value {
    /// Shape name used in schema violation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// The integer, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// The float, if this is a `Float`
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(x) = self {
            Some(*x)
        } else {
            None
        }
    }

    /// Either numeric shape widened to `f64`
    ///
    /// Timestamps written by older clients may arrive as floats, so readers
    /// of millisecond fields go through this.
    pub fn as_number(&self) -> Option<f64> {
        self.as_float().or_else(|| self.as_int().map(|n| n as f64))
    }

    /// The text, if this is a `String`
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// The items, if this is an `Array`
    pub fn as_array(&self) -> Option<&[Value]> {
        if let Value::Array(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    /// The map, if this is an `Object`
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        if let Value::Object(map) = self {
            Some(map)
        } else {
            None
        }
    }
}

macro_rules! value_from {
    ($($src:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$src> for Value {
                fn from($v: $src) -> Self {
                    $body
                }
            }
        )*
    };
}

value_from! {
    () => |_unit| Value::Null;
    bool => |b| Value::Bool(b);
    i32 => |n| Value::Int(i64::from(n));
    i64 => |n| Value::Int(n);
    f64 => |x| Value::Float(x);
    &str => |s| Value::String(s.to_owned());
    String => |s| Value::String(s);
    Vec<u8> => |bytes| Value::Bytes(bytes);
    Vec<Value> => |items| Value::Array(items);
    BTreeMap<String, Value> => |map| Value::Object(map);
}

/// JSON numbers that fit in `i64` become `Int`; everything else becomes
/// `Float`.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => items.into_iter().map(Value::from).collect::<Vec<_>>().into(),
            Json::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect::<BTreeMap<_, _>>()
                .into(),
        }
    }
}
