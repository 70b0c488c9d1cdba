//! Evaluation results.
//!
//! The JSON shape is stable:
//!
//! ```text
//! { "ok": true, "data": <value> }
//! { "ok": false, "error": { "name", "message", "stack"? }, "isSyntaxError"?: true }
//! ```

use otter_bridge::{ErrorValue, HOST_CALL_REJECTED, Value};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value as Json, json};
use std::fmt;

pub const EXECUTION_TIMEOUT: &str = "ExecutionTimeout";
pub const RESOURCE_LIMIT_EXCEEDED: &str = "ResourceLimitExceeded";
pub const SANDBOX_ERROR: &str = "SandboxError";
const SYNTAX_ERROR: &str = "SyntaxError";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    ExecutionTimeout,
    ResourceLimitExceeded,
    HostCallRejected,
    GuestRuntime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => SYNTAX_ERROR,
            ErrorKind::ExecutionTimeout => EXECUTION_TIMEOUT,
            ErrorKind::ResourceLimitExceeded => RESOURCE_LIMIT_EXCEEDED,
            ErrorKind::HostCallRejected => HOST_CALL_REJECTED,
            ErrorKind::GuestRuntime => "GuestRuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Describe whatever the guest threw. Non-error throws keep their
    /// string form as the message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Error(error) => error.clone().into(),
            other => Self::new("Error", other.display_string()),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            EXECUTION_TIMEOUT,
            format!("Script execution timed out after {timeout_ms}ms"),
        )
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new(SANDBOX_ERROR, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.name.as_str() {
            SYNTAX_ERROR => ErrorKind::SyntaxError,
            EXECUTION_TIMEOUT => ErrorKind::ExecutionTimeout,
            RESOURCE_LIMIT_EXCEEDED => ErrorKind::ResourceLimitExceeded,
            HOST_CALL_REJECTED => ErrorKind::HostCallRejected,
            _ => ErrorKind::GuestRuntime,
        }
    }
}

impl From<ErrorValue> for ErrorInfo {
    fn from(error: ErrorValue) -> Self {
        Self {
            name: error.name,
            message: error.message,
            stack: error.stack,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Outcome of one sandbox evaluation. `data` keeps functions and futures as
/// live references; they only flatten when serialized.
#[derive(Debug, Clone)]
pub enum EvalResult {
    Ok {
        data: Value,
    },
    Err {
        error: ErrorInfo,
        is_syntax_error: bool,
    },
}

impl EvalResult {
    pub fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self::Err {
            error,
            is_syntax_error: false,
        }
    }

    pub fn syntax_error(error: ErrorInfo) -> Self {
        Self::Err {
            error,
            is_syntax_error: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn is_syntax_error(&self) -> bool {
        matches!(
            self,
            Self::Err {
                is_syntax_error: true,
                ..
            }
        )
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Ok { data } => Some(data),
            Self::Err { .. } => None,
        }
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Err { error, .. } => Some(error),
            Self::Ok { .. } => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Err {
                is_syntax_error: true,
                ..
            } => Some(ErrorKind::SyntaxError),
            Self::Err { error, .. } => Some(error.kind()),
            Self::Ok { .. } => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Self::Ok { data } => json!({ "ok": true, "data": data.to_json() }),
            Self::Err {
                error,
                is_syntax_error,
            } => {
                let mut out = json!({ "ok": false, "error": error });
                if *is_syntax_error {
                    out["isSyntaxError"] = Json::Bool(true);
                }
                out
            }
        }
    }
}

impl Serialize for EvalResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
