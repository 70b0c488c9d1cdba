//! Everything one sandbox run needs besides the source.

use crate::config::SandboxConfig;
use crate::modules::{ModuleSource, Transpile};
use otter_bridge::{
    ArenaOptions, JsObject, MarshalPredicate, Marshalable, Serializer, SyncMode, SyncPolicy, Value,
};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Configuration plus the embedder's hooks. Cheap to clone.
#[derive(Clone, Default)]
pub struct SandboxOptions {
    pub config: SandboxConfig,
    /// Globals defined before the source runs.
    pub bindings: Vec<(String, Value)>,
    pub transpile: Option<Transpile>,
    pub modules: Option<Arc<dyn ModuleSource>>,
    pub sync_mode: Option<SyncPolicy>,
    pub marshalable: Option<MarshalPredicate>,
    pub serializers: Vec<Arc<dyn Serializer>>,
    /// Runtime for async host functions. Falls back to the ambient runtime.
    pub tokio_handle: Option<Handle>,
}

impl SandboxOptions {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Expose `value` as the global `name`.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    pub fn transpile(
        mut self,
        f: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.transpile = Some(Arc::new(f));
        self
    }

    pub fn modules(mut self, source: impl ModuleSource + 'static) -> Self {
        self.modules = Some(Arc::new(source));
        self
    }

    pub fn sync_mode(mut self, f: impl Fn(&JsObject) -> SyncMode + Send + Sync + 'static) -> Self {
        self.sync_mode = Some(Arc::new(f));
        self
    }

    pub fn marshalable(mut self, f: impl Fn(&Value) -> Marshalable + Send + Sync + 'static) -> Self {
        self.marshalable = Some(Arc::new(f));
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializers.push(Arc::new(serializer));
        self
    }

    pub fn tokio_handle(mut self, handle: Handle) -> Self {
        self.tokio_handle = Some(handle);
        self
    }

    /// The runtime async host functions will run on, if any.
    pub(crate) fn runtime_handle(&self) -> Option<Handle> {
        self.tokio_handle.clone().or_else(|| Handle::try_current().ok())
    }

    pub(crate) fn arena_options(&self) -> ArenaOptions {
        let mut options = ArenaOptions {
            marshalable: self.marshalable.clone(),
            json_futures: self.config.json_futures,
            serializers: self.serializers.clone(),
            tokio: self.runtime_handle(),
            ..ArenaOptions::default()
        };
        if let Some(policy) = &self.sync_mode {
            options.sync_mode = policy.clone();
        }
        options
    }

    /// Whether any binding reaches an async host function.
    pub(crate) fn binds_async(&self) -> bool {
        self.bindings.iter().any(|(_, value)| reaches_async(value, 0))
    }
}

const ASYNC_SCAN_DEPTH: usize = 8;

fn reaches_async(value: &Value, depth: usize) -> bool {
    match value {
        Value::Function(function) => function.is_async(),
        Value::Object(object) if depth < ASYNC_SCAN_DEPTH => object
            .values()
            .iter()
            .any(|v| reaches_async(v, depth + 1)),
        _ => false,
    }
}

impl fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings: Vec<&str> = self.bindings.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("SandboxOptions")
            .field("config", &self.config)
            .field("bindings", &bindings)
            .field("transpile", &self.transpile.is_some())
            .field("modules", &self.modules.is_some())
            .field("sync_mode", &self.sync_mode.is_some())
            .field("marshalable", &self.marshalable.is_some())
            .field("serializers", &self.serializers.len())
            .field("tokio_handle", &self.tokio_handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_bridge::JsFunction;

    #[test]
    fn test_binds_async_scans_nested_objects() {
        let api = JsObject::from_entries([(
            "fetch",
            Value::Function(JsFunction::asynchronous("fetch", |_| async { Ok(Value::Null) })),
        )]);
        let options = SandboxOptions::default().bind("api", Value::Object(api));
        assert!(options.binds_async());

        let sync_only = SandboxOptions::default().bind(
            "add",
            Value::Function(JsFunction::native("add", |_, _| Ok(Value::from(1)))),
        );
        assert!(!sync_only.binds_async());
    }

    #[test]
    fn test_arena_options_carry_config() {
        let config = SandboxConfig::new().json_futures(otter_bridge::JsonFuturePolicy::Error);
        let options = SandboxOptions::new(config).marshalable(|_| Marshalable::Json);
        let arena = options.arena_options();
        assert_eq!(arena.json_futures, otter_bridge::JsonFuturePolicy::Error);
        assert!(arena.marshalable.is_some());
        assert!(arena.tokio.is_none());
    }
}
