//! Module source and transpile hooks.
//!
//! The sandbox has no filesystem. Imports are resolved and loaded through a
//! [`ModuleSource`] the embedder supplies; [`MemoryModules`] keeps sources
//! in memory.

use parking_lot::RwLock;
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Source-to-source transform applied to the evaluated source and to every
/// loaded module. An `Err` is reported as a syntax error.
pub type Transpile = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

pub trait ModuleSource: Send + Sync {
    /// Canonical name of `specifier` imported from `base`, or `None` if it
    /// does not exist.
    fn resolve(&self, base: &str, specifier: &str) -> Option<String>;

    /// Source of a resolved module.
    fn load(&self, name: &str) -> Option<String>;
}

/// In-memory modules keyed by normalized path.
#[derive(Clone, Default)]
pub struct MemoryModules {
    modules: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryModules::insert`].
    pub fn with(self, name: impl AsRef<str>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&self, name: impl AsRef<str>, source: impl Into<String>) {
        let name = normalize(name.as_ref());
        self.modules.write().insert(name, source.into());
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ModuleSource for MemoryModules {
    fn resolve(&self, base: &str, specifier: &str) -> Option<String> {
        let name = if specifier.starts_with("./") || specifier.starts_with("../") {
            let dir = base.rsplit_once('/').map_or("", |(dir, _)| dir);
            normalize(&format!("{dir}/{specifier}"))
        } else {
            normalize(specifier)
        };
        self.modules.read().contains_key(&name).then_some(name)
    }

    fn load(&self, name: &str) -> Option<String> {
        self.modules.read().get(name).cloned()
    }
}

/// Collapse `.` and `..` segments and leading slashes.
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub(crate) struct SourceResolver {
    source: Arc<dyn ModuleSource>,
}

impl SourceResolver {
    pub(crate) fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self { source }
    }
}

impl Resolver for SourceResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        self.source
            .resolve(base, name)
            .ok_or_else(|| Error::new_resolving(base, name))
    }
}

pub(crate) struct SourceLoader {
    source: Arc<dyn ModuleSource>,
    transpile: Option<Transpile>,
}

impl SourceLoader {
    pub(crate) fn new(source: Arc<dyn ModuleSource>, transpile: Option<Transpile>) -> Self {
        Self { source, transpile }
    }
}

impl Loader for SourceLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let source = self
            .source
            .load(name)
            .ok_or_else(|| Error::new_loading(name))?;
        let source = match &self.transpile {
            Some(transpile) => {
                transpile(&source).map_err(|message| Error::new_loading_message(name, message))?
            }
            None => source,
        };
        debug!(module = name, "loading sandbox module");
        Module::declare(ctx.clone(), name, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./a/./b/../c.js"), "a/c.js");
        assert_eq!(normalize("/lib/x.js"), "lib/x.js");
        assert_eq!(normalize("../../x.js"), "x.js");
    }

    #[test]
    fn test_resolve_relative_to_base() {
        let modules = MemoryModules::new()
            .with("lib/math.js", "export const two = 2;")
            .with("util.js", "export default 1;");
        assert_eq!(
            modules.resolve("main.js", "./util.js"),
            Some("util.js".to_string())
        );
        assert_eq!(
            modules.resolve("lib/index.js", "./math.js"),
            Some("lib/math.js".to_string())
        );
        assert_eq!(
            modules.resolve("lib/math.js", "../util.js"),
            Some("util.js".to_string())
        );
        assert_eq!(modules.resolve("main.js", "./missing.js"), None);
        assert_eq!(modules.len(), 2);
    }

    #[test]
    fn test_bare_specifiers_resolve_by_name() {
        let modules = MemoryModules::new().with("config", "export default {};");
        assert_eq!(modules.resolve("deep/a.js", "config"), Some("config".to_string()));
        assert_eq!(modules.load("config").as_deref(), Some("export default {};"));
    }
}
