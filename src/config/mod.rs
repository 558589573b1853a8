//! Configuration module for easy-edge
//!
//! Runtime options load from `$XDG_CONFIG_HOME/easy-edge/config.toml` or
//! `~/.config/easy-edge/config.toml`. Missing files and missing fields fall back
//! to defaults through serde's default attributes.
//!
//! Generation settings are not stored here: they live in the manifest next to
//! the models (see [`crate::models::Manifest`]).
//!
//! # Example
//!
//! ```no_run
//! use easy_edge::config::{resolve_models_dir, Config};
//!
//! let config = Config::load().expect("Failed to load config");
//! let models_dir = resolve_models_dir(config.models_dir.as_deref()).expect("No models dir");
//! println!("Models live in {}", models_dir.display());
//! ```

pub mod schema;

pub use schema::{Config, GenerationSettings, HubConfig, RuntimeConfig, SettingsPatch};

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory used by packaged installs when it exists
pub const HOME_MODELS_DIR: &str = ".easy-edge-models";

/// Relative fallback, created on demand
pub const DEFAULT_MODELS_DIR: &str = "models";

/// Resolve and create the managed directory.
///
/// Order: explicit override, then `~/.easy-edge-models` if it already exists,
/// then `./models`.
pub fn resolve_models_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = select_models_dir(explicit, dirs::home_dir().as_deref());
    fs::create_dir_all(&dir)?;
    tracing::debug!("Using models directory {}", dir.display());
    Ok(dir)
}

fn select_models_dir(explicit: Option<&Path>, home: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }

    if let Some(candidate) = home.map(|h| h.join(HOME_MODELS_DIR)) {
        if candidate.is_dir() {
            return candidate;
        }
    }

    PathBuf::from(DEFAULT_MODELS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_override_wins() {
        let home = TempDir::new().unwrap();
        fs::create_dir(home.path().join(HOME_MODELS_DIR)).unwrap();

        let dir = select_models_dir(Some(Path::new("/tmp/custom")), Some(home.path()));
        assert_eq!(dir, PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn test_home_dir_used_when_present() {
        let home = TempDir::new().unwrap();
        fs::create_dir(home.path().join(HOME_MODELS_DIR)).unwrap();

        let dir = select_models_dir(None, Some(home.path()));
        assert_eq!(dir, home.path().join(HOME_MODELS_DIR));
    }

    #[test]
    fn test_relative_fallback() {
        let home = TempDir::new().unwrap();
        assert_eq!(
            select_models_dir(None, Some(home.path())),
            PathBuf::from(DEFAULT_MODELS_DIR)
        );
        assert_eq!(select_models_dir(None, None), PathBuf::from(DEFAULT_MODELS_DIR));
    }

    #[test]
    fn test_resolve_creates_directory() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("nested").join("models");

        let dir = resolve_models_dir(Some(&target)).unwrap();
        assert_eq!(dir, target);
        assert!(target.is_dir());
    }
}
