//! Error types for otter-sandbox
//!
//! These cover host-side setup failures only. Anything the guest does wrong,
//! including running out of time, comes back as an `EvalResult::Err`.

use otter_bridge::BridgeError;
use thiserror::Error;

/// Errors that can occur while setting up or driving a sandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Bridge failure outside guest evaluation
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Engine failure while creating the runtime or context
    #[error("QuickJS error: {0}")]
    Engine(#[from] rquickjs::Error),

    /// Invalid configuration
    #[error("Invalid sandbox configuration: {0}")]
    Config(String),

    /// Reading a config or script file failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Async host functions were bound but no tokio runtime is reachable
    #[error("Async host functions need a tokio runtime; pass one in SandboxOptions or run inside one")]
    NoTokioRuntime,

    /// The blocking task driving an async evaluation failed
    #[error("Sandbox task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SandboxError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<toml::de::Error> for SandboxError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;
