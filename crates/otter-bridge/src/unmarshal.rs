//! Guest → host conversion, the mirror of `marshal.rs`.

use crate::arena::Arena;
use crate::error::{BridgeError, BridgeResult};
use crate::function::JsFunction;
use crate::future::JsFuture;
use crate::handle::Handle;
use crate::object::{JsObject, Property, PropertyKey};
use crate::serializers::GuestObject;
use crate::symbol::Symbol;
use crate::value::{ErrorValue, Value, format_number};
use bytes::Bytes;
use num_bigint::BigInt;
use rquickjs::{Array, Object, Value as JsValue};
use tracing::trace;

/// Constructor names that do not make an object an instance of a class.
const PLAIN_CTORS: &[&str] = &["", "Object", "Array"];

impl<'js> Arena<'js> {
    pub(crate) fn from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Value> {
        if guest.is_undefined() {
            return Ok(Value::Undefined);
        }
        if guest.is_null() {
            return Ok(Value::Null);
        }
        if let Some(b) = guest.as_bool() {
            return Ok(Value::Bool(b));
        }
        if let Some(n) = guest.as_int() {
            return Ok(Value::Number(f64::from(n)));
        }
        if let Some(n) = guest.as_float() {
            return Ok(Value::Number(n));
        }
        if let Some(s) = guest.as_string() {
            return Ok(Value::String(s.to_string()?));
        }
        if guest.as_big_int().is_some() {
            let text: String = self.intrinsics().big_int_text.call((guest,))?;
            let n = text.parse::<BigInt>().map_err(|_| {
                BridgeError::Thrown(Value::Error(ErrorValue::type_error(format!(
                    "invalid bigint text {text:?}"
                ))))
            })?;
            return Ok(Value::BigInt(n));
        }
        self.reference_from_guest(guest)
    }

    fn reference_from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Value> {
        if let Some(host) = self.registered_host(&guest)? {
            return Ok(host);
        }
        let known = self.inner.table.borrow_mut().find_guest(guest.clone())?;
        if let Some((host, _)) = known {
            return Ok(host);
        }

        let class: String = self.intrinsics().classify.call((guest.clone(),))?;
        match class.as_str() {
            "symbol" => self.symbol_from_guest(guest),
            "bytes" => {
                let list: Vec<f64> = self.intrinsics().from_bytes.call((guest,))?;
                Ok(Value::Bytes(Bytes::from(
                    list.into_iter().map(|b| b as u8).collect::<Vec<u8>>(),
                )))
            }
            "promise" => self.promise_from_guest(guest),
            "function" => self.function_from_guest(guest),
            "object" | "array" | "date" | "map" | "set" | "error" | "url" | "headers" => {
                let ctor: String = self.intrinsics().ctor_name.call((guest.clone(),))?;
                let object = GuestObject {
                    value: guest,
                    class,
                    ctor,
                };
                for serializer in &self.inner.serializers {
                    if let Some(host) = serializer.unmarshal(self, &object)? {
                        trace!(serializer = serializer.name(), "unmarshaled by serializer");
                        return Ok(host);
                    }
                }
                self.object_from_guest(object)
            }
            _ => {
                let text: String = self.intrinsics().display.call((guest,))?;
                Ok(Value::String(text))
            }
        }
    }

    fn symbol_from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Value> {
        let description: Option<String> = self
            .intrinsics()
            .symbol_description
            .call((guest.clone(),))?;
        let host = Value::Symbol(Symbol::new(description));
        self.inner
            .table
            .borrow_mut()
            .set(&host, Handle::new(guest), None, None)?;
        Ok(host)
    }

    fn promise_from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Value> {
        let future = JsFuture::new();
        let host = Value::Future(future.clone());
        self.inner
            .table
            .borrow_mut()
            .set(&host, Handle::new(guest.clone()), None, None)?;
        self.observe_promise(guest, &future)?;
        Ok(host)
    }

    fn function_from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Value> {
        let name: String = self.intrinsics().function_name.call((guest.clone(),))?;
        let is_class: bool = self.intrinsics().is_class.call((guest.clone(),))?;
        let host = Value::Function(JsFunction::guest(name, is_class));
        self.inner
            .table
            .borrow_mut()
            .set(&host, Handle::new(guest), None, None)?;
        Ok(host)
    }

    fn object_from_guest(&self, guest: GuestObject<'js>) -> BridgeResult<Value> {
        let object = if guest.class == "array" {
            JsObject::empty_array()
        } else if PLAIN_CTORS.contains(&guest.ctor.as_str()) {
            JsObject::new()
        } else {
            JsObject::instance_of(guest.ctor.as_str())
        };
        let host = Value::Object(object.clone());
        self.inner
            .table
            .borrow_mut()
            .set(&host, Handle::new(guest.value.clone()), None, None)?;

        let descriptors: Array<'js> = self.intrinsics().describe.call((guest.value.clone(),))?;
        for index in 0..descriptors.len() {
            let descriptor: Object<'js> = descriptors.get(index)?;
            let key = self.key_from_guest(descriptor.get("key")?)?;
            let enumerable: bool = descriptor.get("enumerable")?;
            let configurable: bool = descriptor.get("configurable")?;
            let property = if descriptor.get::<_, bool>("accessor")? {
                Property::Accessor {
                    get: self.accessor_from_guest(descriptor.get("get")?)?,
                    set: self.accessor_from_guest(descriptor.get("set")?)?,
                    enumerable,
                    configurable,
                }
            } else {
                Property::Data {
                    value: self.from_guest(descriptor.get("value")?)?,
                    writable: descriptor.get("writable")?,
                    enumerable,
                    configurable,
                }
            };
            object.define(key, property);
        }

        let proto: JsValue<'js> = self.intrinsics().get_proto.call((guest.value,))?;
        let default_proto: bool = self.intrinsics().is_default_proto.call((proto.clone(),))?;
        if !default_proto {
            if let Value::Object(proto) = self.from_guest(proto)? {
                object.set_proto(Some(proto));
            }
        }
        Ok(host)
    }

    fn accessor_from_guest(&self, guest: JsValue<'js>) -> BridgeResult<Option<JsFunction>> {
        Ok(match self.from_guest(guest)? {
            Value::Function(f) => Some(f),
            _ => None,
        })
    }

    pub(crate) fn key_from_guest(&self, key: JsValue<'js>) -> BridgeResult<PropertyKey> {
        if let Some(name) = key.as_string() {
            return Ok(PropertyKey::String(name.to_string()?));
        }
        if let Some(n) = key.as_int() {
            return Ok(PropertyKey::String(n.to_string()));
        }
        if let Some(n) = key.as_float() {
            return Ok(PropertyKey::String(format_number(n)));
        }
        match self.from_guest(key)? {
            Value::Symbol(symbol) => Ok(PropertyKey::Symbol(symbol)),
            other => Ok(PropertyKey::String(other.display_string())),
        }
    }
}
