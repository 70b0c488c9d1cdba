//! Locating and reading otter-sandbox.toml.

use anyhow::Context;
use otter_sandbox::SandboxConfig;
use std::path::{Path, PathBuf};

/// Config file names to search for, in order of preference.
const CONFIG_NAMES: &[&str] = &["otter-sandbox.toml", ".otter-sandbox.toml"];

/// Load the config from `path`, or from the nearest config file above the
/// current directory. No file at all means defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SandboxConfig> {
    let config_path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    match config_path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading sandbox config");
            SandboxConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        None => Ok(SandboxConfig::default()),
    }
}

/// Search `start` and its ancestors for a config file.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_in_ancestors() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("otter-sandbox.toml"), "[sandbox]\ntimeout_ms = 10\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, root.path().join("otter-sandbox.toml"));
    }

    #[test]
    fn test_nearest_file_wins() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("project");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("otter-sandbox.toml"), "").unwrap();
        std::fs::write(nested.join(".otter-sandbox.toml"), "").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, nested.join(".otter-sandbox.toml"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[sandbox]\ntimeout_ms = 250\nmax_timeouts = 4\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.timeout_ms, Some(250));
        assert_eq!(config.max_timeouts, 4);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
