//! JSON projection of host values.
//!
//! Used for the deep-copy marshal mode and for serializing evaluation results.

use crate::error::{BridgeError, BridgeResult};
use crate::object::{JsObject, PropertyKey};
use crate::value::Value;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value as Json};

/// What a deep-copy marshal does with a future it finds inside the value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonFuturePolicy {
    /// Replace it with `null`.
    #[default]
    Null,
    /// Fail the marshal with [`BridgeError::FutureInJson`].
    Error,
}

#[derive(Clone, Copy)]
enum Mode {
    /// Lossy rendering for results: cycles become `"[Circular]"`.
    Lenient,
    /// Deep copy: cycles fail, futures follow the policy.
    Strict(JsonFuturePolicy),
}

impl Value {
    /// Lossy JSON rendering used for evaluation results.
    pub fn to_json(&self) -> Json {
        let mut stack = Vec::new();
        // Lenient mode never fails.
        encode(self, Mode::Lenient, &mut stack).unwrap_or(Json::Null)
    }

    /// JSON rendering for a deep copy into the guest.
    pub fn to_json_strict(&self, futures: JsonFuturePolicy) -> BridgeResult<Json> {
        let mut stack = Vec::new();
        encode(self, Mode::Strict(futures), &mut stack)
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Object(JsObject::array(items.iter().map(Value::from_json))),
            Json::Object(map) => Value::Object(JsObject::from_entries(
                map.iter().map(|(k, v)| (k.as_str(), Value::from_json(v))),
            )),
        }
    }
}

fn number(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 && !(n == 0.0 && n.is_sign_negative()) {
        Json::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

/// Values dropped from objects and nulled in arrays, as `JSON.stringify` does.
fn is_skipped(value: &Value) -> bool {
    matches!(value, Value::Undefined | Value::Function(_) | Value::Symbol(_))
}

fn encode(value: &Value, mode: Mode, stack: &mut Vec<usize>) -> BridgeResult<Json> {
    Ok(match value {
        Value::Undefined | Value::Null | Value::Function(_) | Value::Symbol(_) => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number(*n),
        Value::BigInt(n) => Json::String(n.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Date(date) => Json::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Url(url) => Json::String(url.to_string()),
        Value::Error(error) => serde_json::to_value(error)?,
        Value::Future(_) => match mode {
            Mode::Strict(JsonFuturePolicy::Error) => return Err(BridgeError::FutureInJson),
            _ => Json::Null,
        },
        Value::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push(Json::Array(vec![encode(k, mode, stack)?, encode(v, mode, stack)?]));
            }
            Json::Array(pairs)
        }
        Value::Set(values) => Json::Array(
            values
                .iter()
                .map(|v| encode(v, mode, stack))
                .collect::<BridgeResult<_>>()?,
        ),
        Value::Headers(pairs) => Json::Array(
            pairs
                .iter()
                .map(|(name, value)| {
                    Json::Array(vec![Json::from(name.as_str()), Json::from(value.as_str())])
                })
                .collect(),
        ),
        Value::Object(object) => {
            if stack.contains(&object.addr()) {
                return match mode {
                    Mode::Lenient => Ok(Json::String("[Circular]".to_string())),
                    Mode::Strict(_) => Err(BridgeError::CyclicJson),
                };
            }
            stack.push(object.addr());
            let encoded = encode_object(object, mode, stack);
            stack.pop();
            encoded?
        }
    })
}

fn encode_object(object: &JsObject, mode: Mode, stack: &mut Vec<usize>) -> BridgeResult<Json> {
    if object.is_array() {
        let mut items = Vec::new();
        for item in object.values() {
            if is_skipped(&item) {
                items.push(Json::Null);
            } else {
                items.push(encode(&item, mode, stack)?);
            }
        }
        return Ok(Json::Array(items));
    }
    let mut map = JsonMap::new();
    for (key, property) in object.properties() {
        let PropertyKey::String(name) = &key else {
            continue;
        };
        if !property.is_enumerable() {
            continue;
        }
        let value = object.get(key.clone());
        if is_skipped(&value) {
            continue;
        }
        map.insert(name.clone(), encode(&value, mode, stack)?);
    }
    Ok(Json::Object(map))
}
