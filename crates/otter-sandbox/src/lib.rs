//! otter-sandbox - run untrusted scripts in an isolated QuickJS context.
//!
//! Each evaluation gets a fresh runtime. The source runs as an ES module and
//! its default export is the result. Host values are exposed through
//! [`otter_bridge`], so guest code can call host functions, await host
//! futures and hand functions back.
//!
//! Limits:
//!
//! - a wall-clock deadline enforced by the engine's interrupt handler
//! - ceilings on pending `setTimeout` / `setInterval` / `setImmediate`
//! - optional heap and stack limits
//!
//! When the deadline passes, in-flight async host calls are rejected and
//! their tasks aborted before the result comes back.
//!
//! # Example
//!
//! ```no_run
//! use otter_sandbox::{Sandbox, SandboxConfig, SandboxOptions};
//!
//! let sandbox = Sandbox::new(SandboxOptions::new(SandboxConfig::new().timeout_ms(1000)));
//! let result = sandbox.eval("export default 1 + 1;").unwrap();
//! assert_eq!(result.to_json(), serde_json::json!({ "ok": true, "data": 2 }));
//! ```

pub mod config;
pub mod error;
pub mod interrupt;
pub mod modules;
pub mod options;
mod pump;
pub mod result;
pub mod session;
mod timers;

pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxResult};
pub use interrupt::Interrupt;
pub use modules::{MemoryModules, ModuleSource, Transpile};
pub use options::SandboxOptions;
pub use result::{
    ErrorInfo, ErrorKind, EvalResult, EXECUTION_TIMEOUT, RESOURCE_LIMIT_EXCEEDED, SANDBOX_ERROR,
};
pub use session::{Phase, Sandbox, Session, run_sandbox};
pub use timers::TimerLimits;

pub use otter_bridge;
