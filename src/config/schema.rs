use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    /// Managed directory override; wins over the well-known locations
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HubConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding an access token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the next chunk of a download; the transfer itself is unbounded
    #[serde(default = "default_idle_timeout_secs", alias = "timeout_secs")]
    pub idle_timeout_secs: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RuntimeConfig {
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Worker threads; all available cores when unset
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
}

/// Generation defaults persisted in the manifest
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Partial update of [`GenerationSettings`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SettingsPatch {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

// Default value functions
fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_token_env() -> String {
    "HF_TOKEN".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    120
}
fn default_context_size() -> u32 {
    2048
}
fn default_stop() -> Vec<String> {
    vec!["User:".to_string(), "\n\n".to_string()]
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context_size: default_context_size(),
            threads: None,
            stop: default_stop(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl GenerationSettings {
    /// Check the documented bounds: `max_tokens > 0`, `temperature` in [0, 2], `top_p` in (0, 1]
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(EdgeError::InvalidSettings(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(EdgeError::InvalidSettings(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(EdgeError::InvalidSettings(format!(
                "top_p must be within (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }

    /// Apply a patch, returning the validated result without touching `self`
    pub fn patched(&self, patch: &SettingsPatch) -> Result<Self> {
        let updated = Self {
            max_tokens: patch.max_tokens.unwrap_or(self.max_tokens),
            temperature: patch.temperature.unwrap_or(self.temperature),
            top_p: patch.top_p.unwrap_or(self.top_p),
        };
        updated.validate()?;
        Ok(updated)
    }
}

impl SettingsPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_tokens.is_none() && self.temperature.is_none() && self.top_p.is_none()
    }
}

impl RuntimeConfig {
    /// Thread count handed to the runtime
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        })
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            EdgeError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/easy-edge/config.toml`
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("easy-edge").join("config.toml"))
}
