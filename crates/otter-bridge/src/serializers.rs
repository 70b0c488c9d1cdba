//! Custom type serializers.
//!
//! Serializers are tried in registration order, built-ins first, after the
//! correlation table and before generic function/object handling. Built-in
//! types are copied by value, so their guest handles are not correlated.

use crate::arena::Arena;
use crate::error::BridgeResult;
use crate::value::{ErrorValue, Value};
use chrono::DateTime;
use rquickjs::{Array, Value as JsValue};
use std::sync::Arc;
use url::Url;

/// A guest object the unmarshaler could not resolve by identity.
pub struct GuestObject<'js> {
    pub value: JsValue<'js>,
    /// Built-in classification (`date`, `map`, `set`, `url`, `error`, `object`, ...).
    pub class: String,
    /// Name of the guest constructor, empty when there is none.
    pub ctor: String,
}

pub trait Serializer: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `value` into a guest value, or `None` to pass.
    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>>;

    /// Convert a guest object into a host value, or `None` to pass.
    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>>;
}

pub(crate) fn builtin() -> Vec<Arc<dyn Serializer>> {
    vec![
        Arc::new(DateSerializer),
        Arc::new(MapSerializer),
        Arc::new(SetSerializer),
        Arc::new(UrlSerializer),
        Arc::new(HeadersSerializer),
        Arc::new(ErrorSerializer),
    ]
}

pub struct DateSerializer;

impl Serializer for DateSerializer {
    fn name(&self) -> &str {
        "date"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Date(date) = value else {
            return Ok(None);
        };
        let millis = date.timestamp_millis() as f64;
        Ok(Some(arena.intrinsics().new_date.call((millis,))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "date" {
            return Ok(None);
        }
        let millis: f64 = arena.intrinsics().get_time.call((object.value.clone(),))?;
        if !millis.is_finite() {
            return Ok(Some(Value::Null));
        }
        Ok(Some(
            DateTime::from_timestamp_millis(millis as i64).map_or(Value::Null, Value::Date),
        ))
    }
}

pub struct MapSerializer;

impl Serializer for MapSerializer {
    fn name(&self) -> &str {
        "map"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Map(entries) = value else {
            return Ok(None);
        };
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let pair = arena.guest_array(vec![arena.to_guest(key)?, arena.to_guest(value)?])?;
            pairs.push(pair);
        }
        let pairs = arena.guest_array(pairs)?;
        Ok(Some(arena.intrinsics().new_map.call((pairs,))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "map" {
            return Ok(None);
        }
        let pairs: Array<'js> = arena.intrinsics().map_entries.call((object.value.clone(),))?;
        let mut entries = Vec::with_capacity(pairs.len());
        for index in 0..pairs.len() {
            let pair: Array<'js> = pairs.get(index)?;
            let key = arena.from_guest(pair.get(0)?)?;
            let value = arena.from_guest(pair.get(1)?)?;
            entries.push((key, value));
        }
        Ok(Some(Value::Map(entries)))
    }
}

pub struct SetSerializer;

impl Serializer for SetSerializer {
    fn name(&self) -> &str {
        "set"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Set(values) = value else {
            return Ok(None);
        };
        let items = values
            .iter()
            .map(|v| arena.to_guest(v))
            .collect::<BridgeResult<Vec<_>>>()?;
        let items = arena.guest_array(items)?;
        Ok(Some(arena.intrinsics().new_set.call((items,))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "set" {
            return Ok(None);
        }
        let items: Array<'js> = arena.intrinsics().set_values.call((object.value.clone(),))?;
        let mut values = Vec::with_capacity(items.len());
        for index in 0..items.len() {
            values.push(arena.from_guest(items.get(index)?)?);
        }
        Ok(Some(Value::Set(values)))
    }
}

/// URLs become guest `URL` instances where the guest has that global, and
/// strings otherwise.
pub struct UrlSerializer;

impl Serializer for UrlSerializer {
    fn name(&self) -> &str {
        "url"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Url(url) = value else {
            return Ok(None);
        };
        Ok(Some(arena.intrinsics().new_url.call((url.as_str(),))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "url" {
            return Ok(None);
        }
        let href: String = arena.intrinsics().url_href.call((object.value.clone(),))?;
        Ok(Some(match Url::parse(&href) {
            Ok(url) => Value::Url(url),
            Err(_) => Value::String(href),
        }))
    }
}

/// Header lists become guest `Headers` instances where the guest has that
/// global, and plain objects otherwise. Guest `Headers` come back as their
/// `entries()` in iteration order.
pub struct HeadersSerializer;

impl Serializer for HeadersSerializer {
    fn name(&self) -> &str {
        "headers"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Headers(pairs) = value else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(pairs.len());
        for (name, value) in pairs {
            let pair = arena.guest_array(vec![
                arena.to_guest(&Value::from(name.as_str()))?,
                arena.to_guest(&Value::from(value.as_str()))?,
            ])?;
            items.push(pair);
        }
        let items = arena.guest_array(items)?;
        Ok(Some(arena.intrinsics().new_headers.call((items,))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "headers" {
            return Ok(None);
        }
        let items: Array<'js> = arena
            .intrinsics()
            .headers_entries
            .call((object.value.clone(),))?;
        let mut pairs = Vec::with_capacity(items.len());
        for index in 0..items.len() {
            let pair: Array<'js> = items.get(index)?;
            pairs.push((pair.get(0)?, pair.get(1)?));
        }
        Ok(Some(Value::Headers(pairs)))
    }
}

pub struct ErrorSerializer;

impl Serializer for ErrorSerializer {
    fn name(&self) -> &str {
        "error"
    }

    fn marshal<'js>(&self, arena: &Arena<'js>, value: &Value) -> BridgeResult<Option<JsValue<'js>>> {
        let Value::Error(error) = value else {
            return Ok(None);
        };
        let stack = error.stack.clone();
        Ok(Some(arena.intrinsics().make_error.call((
            error.name.as_str(),
            error.message.as_str(),
            stack,
        ))?))
    }

    fn unmarshal<'js>(
        &self,
        arena: &Arena<'js>,
        object: &GuestObject<'js>,
    ) -> BridgeResult<Option<Value>> {
        if object.class != "error" {
            return Ok(None);
        }
        let parts: Array<'js> = arena.intrinsics().error_parts.call((object.value.clone(),))?;
        Ok(Some(Value::Error(ErrorValue {
            name: parts.get(0)?,
            message: parts.get(1)?,
            stack: parts.get(2)?,
        })))
    }
}
