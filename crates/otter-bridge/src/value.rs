//! Host value model.
//!
//! Everything that crosses the bridge on the host side is a [`Value`]. Scalars
//! and built-ins (`Bytes`, `Date`, `Url`, `Map`, `Set`, `Headers`, `Error`)
//! are copied by value; objects, functions, futures and symbols are
//! references whose identity is preserved by the correlation table.

use crate::function::JsFunction;
use crate::future::JsFuture;
use crate::object::{JsObject, Property, PropertyKey};
use crate::symbol::Symbol;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// An error value as seen from the host: guest `Error` instances unmarshal to
/// this and marshal back to an instance of the matching constructor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigInt),
    String(String),
    Bytes(Bytes),
    Symbol(Symbol),
    Date(DateTime<Utc>),
    Url(Url),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// Ordered name/value pairs, as in a fetch `Headers` instance.
    Headers(Vec<(String, String)>),
    Error(ErrorValue),
    Object(JsObject),
    Function(JsFunction),
    Future(JsFuture),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Symbol(_) => "symbol",
            Value::Date(_) => "date",
            Value::Url(_) => "url",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Headers(_) => "headers",
            Value::Error(_) => "error",
            Value::Object(o) if o.is_array() => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Future(_) => "future",
        }
    }

    /// Values converted directly, without consulting the correlation table.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined
                | Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::BigInt(_)
                | Value::String(_)
                | Value::Bytes(_)
        )
    }

    /// Values whose identity the bridge preserves.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Function(_) | Value::Future(_) | Value::Symbol(_)
        )
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JsObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&JsFunction> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_future(&self) -> Option<&JsFuture> {
        match self {
            Value::Future(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Convenience for reading a property of an object value.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        match self {
            Value::Object(o) => o.get(key),
            _ => Value::Undefined,
        }
    }

    /// Structural equality. Objects compare by own properties and prototype,
    /// functions and futures by identity. Cycles are handled by assuming
    /// equality for pairs already under comparison.
    pub fn deep_eq(&self, other: &Value) -> bool {
        let mut seen = HashSet::new();
        deep_eq_inner(self, other, &mut seen)
    }

    /// Readable rendering of a thrown non-error value, like `String(v)`.
    pub fn display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::BigInt(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Error(e) => e.to_string(),
            Value::Date(d) => d.to_rfc3339(),
            Value::Url(u) => u.to_string(),
            Value::Symbol(s) => format!("Symbol({})", s.description().unwrap_or("")),
            Value::Function(f) => format!("function {}()", f.name()),
            Value::Object(o) if o.is_array() => o
                .values()
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(","),
            _ => "[object Object]".to_string(),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn deep_eq_inner(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            if !seen.insert((x.addr(), y.addr())) {
                return true;
            }
            if x.kind() != y.kind() || x.class_name() != y.class_name() {
                return false;
            }
            let xs = x.properties();
            let ys = y.properties();
            if xs.len() != ys.len() {
                return false;
            }
            let props_equal = xs.iter().all(|(key, px)| {
                ys.iter()
                    .find(|(k, _)| k == key)
                    .is_some_and(|(_, py)| property_eq(px, py, seen))
            });
            props_equal
                && match (x.proto(), y.proto()) {
                    (None, None) => true,
                    (Some(px), Some(py)) => {
                        deep_eq_inner(&Value::Object(px), &Value::Object(py), seen)
                    }
                    _ => false,
                }
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().zip(y).all(|((kx, vx), (ky, vy))| {
                    deep_eq_inner(kx, ky, seen) && deep_eq_inner(vx, vy, seen)
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(vx, vy)| deep_eq_inner(vx, vy, seen))
        }
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a == b,
    }
}

fn property_eq(a: &Property, b: &Property, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Property::Data { value: va, .. }, Property::Data { value: vb, .. }) => {
            a.is_enumerable() == b.is_enumerable() && deep_eq_inner(va, vb, seen)
        }
        (
            Property::Accessor { get: ga, set: sa, .. },
            Property::Accessor { get: gb, set: sb, .. },
        ) => ga.is_some() == gb.is_some() && sa.is_some() == sb.is_some(),
        _ => false,
    }
}

/// Strict equality: scalars by value, references by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Url(a), Value::Url(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Headers(a), Value::Headers(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Future(a), Value::Future(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Value::BigInt(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Url> for Value {
    fn from(value: Url) -> Self {
        Value::Url(value)
    }
}

impl From<ErrorValue> for Value {
    fn from(value: ErrorValue) -> Self {
        Value::Error(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::Symbol(value)
    }
}

impl From<JsObject> for Value {
    fn from(value: JsObject) -> Self {
        Value::Object(value)
    }
}

impl From<JsFunction> for Value {
    fn from(value: JsFunction) -> Self {
        Value::Function(value)
    }
}

impl From<JsFuture> for Value {
    fn from(value: JsFuture) -> Self {
        Value::Future(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Object(JsObject::array(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
