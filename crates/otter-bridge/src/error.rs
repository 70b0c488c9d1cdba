//! Error types for otter-bridge

use crate::value::{ErrorValue, Value};
use thiserror::Error;

/// Errors that can occur while exchanging values with the guest
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Guest code threw; the thrown value has been unmarshaled
    #[error("guest threw: {}", .0.display_string())]
    Thrown(Value),

    /// Guest source failed to parse
    #[error("guest source failed to parse: {}", .0.display_string())]
    Syntax(Value),

    /// Engine-level failure that is not a guest exception
    #[error(transparent)]
    Engine(#[from] rquickjs::Error),

    /// The arena was disposed
    #[error("arena has been disposed")]
    Disposed,

    /// Value kind cannot be wrapped for live sync
    #[error("{0} values cannot be synchronized")]
    NotSyncable(&'static str),

    /// JSON (de)serialization failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Deep copy met a future and the policy forbids it
    #[error("cannot deep-copy a value containing a future")]
    FutureInJson,

    /// Deep copy met a cycle
    #[error("cannot deep-copy a cyclic value")]
    CyclicJson,

    /// A dispatch id that the arena does not know
    #[error("unknown host function id {0}")]
    UnknownFunction(u64),
}

impl BridgeError {
    /// Host-side error value describing this failure, as a guest would see it.
    pub fn to_value(&self) -> Value {
        match self {
            BridgeError::Thrown(value) | BridgeError::Syntax(value) => value.clone(),
            BridgeError::NotSyncable(_)
            | BridgeError::FutureInJson
            | BridgeError::CyclicJson
            | BridgeError::UnknownFunction(_) => {
                Value::Error(ErrorValue::type_error(self.to_string()))
            }
            _ => Value::Error(ErrorValue::new("InternalError", self.to_string())),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
