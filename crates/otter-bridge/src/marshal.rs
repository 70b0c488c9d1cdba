//! Host → guest conversion.
//!
//! Lookup order: primitives, registered pairs, the correlation table, the
//! marshalability predicate, serializers, then structural conversion of
//! symbols, futures, functions and objects. Structural conversions record
//! the new pair before recursing, so cycles resolve to the guest value being
//! built.

use crate::arena::{Arena, Marshalable};
use crate::error::{BridgeError, BridgeResult};
use crate::function::JsFunction;
use crate::future::JsFuture;
use crate::handle::Handle;
use crate::object::{JsObject, Property, PropertyKey};
use crate::symbol::Symbol;
use crate::value::Value;
use rquickjs::{Object, Value as JsValue};
use tracing::trace;

impl<'js> Arena<'js> {
    pub(crate) fn to_guest(&self, value: &Value) -> BridgeResult<JsValue<'js>> {
        let ctx = self.ctx().clone();
        match value {
            Value::Undefined => Ok(JsValue::new_undefined(ctx)),
            Value::Null => Ok(JsValue::new_null(ctx)),
            Value::Bool(b) => Ok(JsValue::new_bool(ctx, *b)),
            Value::Number(n) => Ok(JsValue::new_number(ctx, *n)),
            Value::String(s) => Ok(rquickjs::String::from_str(ctx, s)?.into_value()),
            Value::BigInt(n) => Ok(self.intrinsics().to_big_int.call((n.to_string(),))?),
            Value::Bytes(bytes) => {
                let list: Vec<i32> = bytes.iter().map(|b| i32::from(*b)).collect();
                Ok(self.intrinsics().to_bytes.call((list,))?)
            }
            _ => self.reference_to_guest(value),
        }
    }

    fn reference_to_guest(&self, value: &Value) -> BridgeResult<JsValue<'js>> {
        if let Some(guest) = self.registered_guest(value) {
            return Ok(guest);
        }
        let known = self.inner.table.borrow_mut().get(value)?;
        if let Some(guest) = known.and_then(|h| h.value()) {
            return Ok(guest);
        }

        match self.marshalability(value) {
            Marshalable::Skip => return Ok(JsValue::new_undefined(self.ctx().clone())),
            Marshalable::Json => return self.json_to_guest(value),
            Marshalable::Full => {}
        }

        for serializer in &self.inner.serializers {
            if let Some(guest) = serializer.marshal(self, value)? {
                trace!(serializer = serializer.name(), "marshaled by serializer");
                return Ok(guest);
            }
        }

        match value {
            Value::Symbol(symbol) => self.symbol_to_guest(value, symbol),
            Value::Future(future) => self.future_to_guest(value, future),
            Value::Function(function) => self.function_to_guest(value, function),
            Value::Object(object) => self.object_to_guest(value, object),
            _ => Ok(JsValue::new_undefined(self.ctx().clone())),
        }
    }

    fn marshalability(&self, value: &Value) -> Marshalable {
        match &self.inner.options.marshalable {
            Some(predicate) => predicate(value),
            None => Marshalable::Full,
        }
    }

    fn json_to_guest(&self, value: &Value) -> BridgeResult<JsValue<'js>> {
        let json = value.to_json_strict(self.inner.options.json_futures)?;
        let text = serde_json::to_string(&json)?;
        Ok(self.intrinsics().json_parse.call((text,))?)
    }

    fn symbol_to_guest(&self, value: &Value, symbol: &Symbol) -> BridgeResult<JsValue<'js>> {
        let guest: JsValue<'js> = self
            .intrinsics()
            .new_symbol
            .call((symbol.description(),))?;
        self.inner
            .table
            .borrow_mut()
            .set(value, Handle::new(guest.clone()), None, None)?;
        Ok(guest)
    }

    /// A guest promise settled by `future`.
    fn future_to_guest(&self, value: &Value, future: &JsFuture) -> BridgeResult<JsValue<'js>> {
        let deferred: Object<'js> = self.intrinsics().deferred.call(())?;
        let promise: JsValue<'js> = deferred.get("promise")?;
        self.inner
            .table
            .borrow_mut()
            .set(value, Handle::new(promise.clone()), None, None)?;
        self.track_future(future, &deferred)?;
        Ok(promise)
    }

    fn function_to_guest(&self, value: &Value, function: &JsFunction) -> BridgeResult<JsValue<'js>> {
        if function.is_guest() {
            // Its guest side is gone (disposed handle or another arena).
            return Err(BridgeError::UnknownFunction(function.id()));
        }
        let dispatch = self.dispatchers(|d| d.host.clone())?;
        let guest: JsValue<'js> = self.intrinsics().host_function.call((
            dispatch,
            function.id() as f64,
            function.name(),
        ))?;
        self.inner
            .host_functions
            .borrow_mut()
            .insert(function.id(), function.clone());
        self.inner
            .table
            .borrow_mut()
            .set(value, Handle::new(guest.clone()), None, None)?;
        Ok(guest)
    }

    fn object_to_guest(&self, value: &Value, object: &JsObject) -> BridgeResult<JsValue<'js>> {
        let target: JsValue<'js> = if object.is_array() {
            self.intrinsics().new_array.call(())?
        } else {
            self.intrinsics().new_object.call(())?
        };

        let guest = if self.is_synced(object) {
            let proxy = self.make_proxy(target.clone(), object.id())?;
            self.inner.table.borrow_mut().set(
                value,
                Handle::new(proxy.clone()),
                None,
                Some(Handle::new(target.clone())),
            )?;
            proxy
        } else {
            self.inner
                .table
                .borrow_mut()
                .set(value, Handle::new(target.clone()), None, None)?;
            target.clone()
        };

        // Populate the raw target so proxy traps stay quiet.
        for (key, property) in object.properties() {
            self.define_on_guest(&target, &key, &property)?;
        }
        if let Some(proto) = object.proto() {
            let proto = self.to_guest(&Value::Object(proto))?;
            self.intrinsics().set_proto.call::<_, ()>((target, proto))?;
        }
        Ok(guest)
    }

    pub(crate) fn define_on_guest(
        &self,
        target: &JsValue<'js>,
        key: &PropertyKey,
        property: &Property,
    ) -> BridgeResult<()> {
        let descriptor = Object::new(self.ctx().clone())?;
        match property {
            Property::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => {
                descriptor.set("value", self.to_guest(value)?)?;
                descriptor.set("writable", *writable)?;
                descriptor.set("enumerable", *enumerable)?;
                descriptor.set("configurable", *configurable)?;
            }
            Property::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => {
                if let Some(getter) = get {
                    descriptor.set("get", self.to_guest(&Value::Function(getter.clone()))?)?;
                }
                if let Some(setter) = set {
                    descriptor.set("set", self.to_guest(&Value::Function(setter.clone()))?)?;
                }
                descriptor.set("enumerable", *enumerable)?;
                descriptor.set("configurable", *configurable)?;
            }
        }
        let key = self.key_to_guest(key)?;
        self.intrinsics()
            .define
            .call::<_, ()>((target.clone(), key, descriptor))?;
        Ok(())
    }

    pub(crate) fn key_to_guest(&self, key: &PropertyKey) -> BridgeResult<JsValue<'js>> {
        match key {
            PropertyKey::String(name) => {
                Ok(rquickjs::String::from_str(self.ctx().clone(), name)?.into_value())
            }
            PropertyKey::Symbol(symbol) => self.to_guest(&Value::Symbol(symbol.clone())),
        }
    }
}
