//! Host-side objects and arrays.
//!
//! A [`JsObject`] is an ordered property map with an optional prototype. It is
//! shared by reference (`Arc`), so cloning a `JsObject` never copies its
//! properties, and identity is the allocation. Arrays are objects of kind
//! [`ObjectKind::Array`] whose elements live under index keys.

use crate::function::{GuestCall, JsFunction, NoGuest};
use crate::symbol::Symbol;
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub type ObjectId = u64;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Property key: a string (array indices included) or a symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(String),
    Symbol(Symbol),
}

impl PropertyKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyKey::String(s) => Some(s),
            PropertyKey::Symbol(_) => None,
        }
    }

    fn index(&self) -> Option<usize> {
        self.as_str().and_then(|s| {
            if s.len() > 1 && s.starts_with('0') {
                return None;
            }
            s.parse().ok()
        })
    }
}

impl From<&str> for PropertyKey {
    fn from(value: &str) -> Self {
        PropertyKey::String(value.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(value: String) -> Self {
        PropertyKey::String(value)
    }
}

impl From<usize> for PropertyKey {
    fn from(value: usize) -> Self {
        PropertyKey::String(value.to_string())
    }
}

impl From<Symbol> for PropertyKey {
    fn from(value: Symbol) -> Self {
        PropertyKey::Symbol(value)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => f.write_str(s),
            PropertyKey::Symbol(sym) => write!(f, "Symbol({})", sym.description().unwrap_or("")),
        }
    }
}

/// A property descriptor. Accessors are kept as accessors across the bridge.
#[derive(Clone, Debug)]
pub enum Property {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<JsFunction>,
        set: Option<JsFunction>,
        enumerable: bool,
        configurable: bool,
    },
}

impl Property {
    /// Writable, enumerable, configurable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Property::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-enumerable data property, like class methods on a prototype.
    pub fn hidden(value: impl Into<Value>) -> Self {
        Property::Data {
            value: value.into(),
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn accessor(get: Option<JsFunction>, set: Option<JsFunction>) -> Self {
        Property::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Property::Data { enumerable, .. } | Property::Accessor { enumerable, .. } => {
                *enumerable
            }
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Property::Data { configurable, .. } | Property::Accessor { configurable, .. } => {
                *configurable
            }
        }
    }

    /// The stored value of a data property.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Property::Data { value, .. } => Some(value),
            Property::Accessor { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Array,
}

struct ObjectState {
    props: IndexMap<PropertyKey, Property>,
    proto: Option<JsObject>,
}

pub(crate) struct ObjectInner {
    id: ObjectId,
    kind: ObjectKind,
    class_name: Option<String>,
    state: RwLock<ObjectState>,
}

/// Shared host object.
#[derive(Clone)]
pub struct JsObject {
    inner: Arc<ObjectInner>,
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

impl JsObject {
    fn with_kind(kind: ObjectKind, class_name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                class_name,
                state: RwLock::new(ObjectState {
                    props: IndexMap::new(),
                    proto: None,
                }),
            }),
        }
    }

    pub fn new() -> Self {
        Self::with_kind(ObjectKind::Plain, None)
    }

    /// An instance of a named host class. Embedder serializers can match on
    /// [`JsObject::class_name`].
    pub fn instance_of(class_name: impl Into<String>) -> Self {
        Self::with_kind(ObjectKind::Plain, Some(class_name.into()))
    }

    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        let array = Self::with_kind(ObjectKind::Array, None);
        for value in values {
            array.push(value);
        }
        array
    }

    pub fn empty_array() -> Self {
        Self::with_kind(ObjectKind::Array, None)
    }

    /// Build a plain object from `(key, value)` pairs.
    pub fn from_entries<K: Into<PropertyKey>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let object = Self::new();
        for (key, value) in entries {
            object.set(key, value);
        }
        object
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.inner.kind
    }

    pub fn is_array(&self) -> bool {
        self.inner.kind == ObjectKind::Array
    }

    pub fn class_name(&self) -> Option<&str> {
        self.inner.class_name.as_deref()
    }

    pub fn ptr_eq(&self, other: &JsObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ObjectInner>) -> Self {
        Self { inner }
    }

    pub fn property(&self, key: impl Into<PropertyKey>) -> Option<Property> {
        self.inner.state.read().props.get(&key.into()).cloned()
    }

    pub fn has(&self, key: impl Into<PropertyKey>) -> bool {
        self.inner.state.read().props.contains_key(&key.into())
    }

    /// Read a property. Accessors run their getter with no guest available,
    /// so guest-backed getters read as `undefined` here; use
    /// [`JsObject::get_with`] for those. Prototypes are consulted.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        self.get_with(key, &NoGuest).unwrap_or(Value::Undefined)
    }

    pub fn get_with(
        &self,
        key: impl Into<PropertyKey>,
        guest: &dyn GuestCall,
    ) -> Result<Value, Value> {
        let key = key.into();
        let mut current = Some(self.clone());
        while let Some(object) = current {
            let (property, proto) = {
                let state = object.inner.state.read();
                (state.props.get(&key).cloned(), state.proto.clone())
            };
            match property {
                Some(Property::Data { value, .. }) => return Ok(value),
                Some(Property::Accessor { get: Some(get), .. }) => {
                    return get.call(guest, Value::Object(self.clone()), Vec::new());
                }
                Some(Property::Accessor { get: None, .. }) => return Ok(Value::Undefined),
                None => current = proto,
            }
        }
        Ok(Value::Undefined)
    }

    /// Assign a property. Runs a setter if the key is an accessor, ignores
    /// non-writable data properties. Returns whether the write took effect.
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        self.set_with(key, value, &NoGuest).unwrap_or(false)
    }

    pub fn set_with(
        &self,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
        guest: &dyn GuestCall,
    ) -> Result<bool, Value> {
        let key = key.into();
        let value = value.into();
        let setter = {
            let mut state = self.inner.state.write();
            match state.props.get_mut(&key) {
                Some(Property::Data {
                    value: slot,
                    writable,
                    ..
                }) => {
                    if !*writable {
                        return Ok(false);
                    }
                    *slot = value;
                    return Ok(true);
                }
                Some(Property::Accessor { set, .. }) => set.clone(),
                None => {
                    state.props.insert(key, Property::data(value));
                    return Ok(true);
                }
            }
        };
        match setter {
            Some(set) => {
                set.call(guest, Value::Object(self.clone()), vec![value])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Define (or redefine) an own property with a full descriptor.
    pub fn define(&self, key: impl Into<PropertyKey>, property: Property) {
        self.inner.state.write().props.insert(key.into(), property);
    }

    /// Remove an own property. Non-configurable properties stay.
    pub fn delete(&self, key: impl Into<PropertyKey>) -> bool {
        let key = key.into();
        let mut state = self.inner.state.write();
        match state.props.get(&key) {
            Some(property) if !property.is_configurable() => false,
            Some(_) => {
                state.props.shift_remove(&key);
                true
            }
            None => true,
        }
    }

    pub fn keys(&self) -> Vec<PropertyKey> {
        self.inner.state.read().props.keys().cloned().collect()
    }

    /// Own properties in insertion order.
    pub fn properties(&self) -> Vec<(PropertyKey, Property)> {
        self.inner
            .state
            .read()
            .props
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        let state = self.inner.state.read();
        match self.inner.kind {
            ObjectKind::Array => state
                .props
                .keys()
                .filter_map(PropertyKey::index)
                .max()
                .map_or(0, |max| max + 1),
            ObjectKind::Plain => state.props.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array elements in index order, holes as `undefined`.
    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    pub fn push(&self, value: impl Into<Value>) {
        let index = self.len();
        self.set(index, value);
    }

    pub fn proto(&self) -> Option<JsObject> {
        self.inner.state.read().proto.clone()
    }

    pub fn set_proto(&self, proto: Option<JsObject>) {
        self.inner.state.write().proto = proto;
    }
}

impl PartialEq for JsObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("class_name", &self.inner.class_name)
            .finish()
    }
}
