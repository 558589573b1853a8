use crate::config::{GenerationSettings, SettingsPatch};
use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the manifest inside the managed directory
pub const MANIFEST_FILE: &str = "config.json";

/// File name of the advisory lock guarding manifest updates
pub const LOCK_FILE: &str = "config.lock";

/// A locally tracked model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Key in the manifest map; not repeated inside the JSON record
    #[serde(skip)]
    pub name: String,
    /// Path relative to the managed directory
    pub filename: String,
    #[serde(rename = "repo_id")]
    pub source_repo: String,
    pub original_filename: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<String>,
}

/// Durable record of tracked models and generation defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Manifest {
    #[serde(rename = "models", default)]
    pub entries: BTreeMap<String, ModelEntry>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub settings: GenerationSettings,
}

impl Manifest {
    /// Load manifest from file; a missing file gives a fresh manifest
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|reason| EdgeError::CorruptManifest {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let mut manifest: Self = serde_json::from_str(content).map_err(|e| e.to_string())?;

        manifest.settings.validate().map_err(|e| e.to_string())?;

        for (name, entry) in &mut manifest.entries {
            entry.name.clone_from(name);
        }

        Ok(manifest)
    }

    /// Save manifest to file atomically (tmp + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EdgeError::Other(format!("Failed to serialize manifest: {e}")))?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;
        tracing::debug!("Saved manifest to {}", path.display());

        Ok(())
    }

    /// Add or replace the entry keyed by `entry.name`
    pub fn upsert(&mut self, entry: ModelEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Remove an entry, clearing the default if it pointed there
    pub fn remove(&mut self, name: &str) -> Result<ModelEntry> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| EdgeError::ModelNotFound(name.to_string()))?;

        if self.default_model.as_deref() == Some(name) {
            self.default_model = None;
        }

        Ok(entry)
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.get(name)
    }

    /// Point the default at an existing entry
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.entries.contains_key(name) {
            return Err(EdgeError::ModelNotFound(name.to_string()));
        }

        self.default_model = Some(name.to_string());
        Ok(())
    }

    /// Default model name, or `None` when the reference no longer resolves
    #[must_use]
    pub fn default_model(&self) -> Option<&str> {
        self.default_model
            .as_deref()
            .filter(|name| self.entries.contains_key(*name))
    }

    /// Apply a validated settings patch
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<GenerationSettings> {
        self.settings = self.settings.patched(patch)?;
        Ok(self.settings)
    }
}

/// Manifest location inside a managed directory
#[must_use]
pub fn manifest_path(models_dir: &Path) -> PathBuf {
    models_dir.join(MANIFEST_FILE)
}

/// Exclusive advisory lock on the manifest, released on drop
#[derive(Debug)]
pub struct ManifestLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
}

impl ManifestLock {
    /// Block until the lock for `models_dir` is held
    #[cfg(unix)]
    pub fn acquire(models_dir: &Path) -> Result<Self> {
        use nix::fcntl::{Flock, FlockArg};

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(models_dir.join(LOCK_FILE))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| EdgeError::Io(std::io::Error::from(errno)))?;

        Ok(Self { _lock: lock })
    }

    #[cfg(not(unix))]
    pub fn acquire(_models_dir: &Path) -> Result<Self> {
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, size_bytes: u64) -> ModelEntry {
        ModelEntry {
            name: name.to_string(),
            filename: format!("{name}.gguf"),
            source_repo: format!("owner/{name}"),
            original_filename: "model-q4_0.gguf".to_string(),
            size_bytes,
            revision: None,
            downloaded_at: None,
        }
    }

    #[test]
    fn test_default_manifest() {
        let manifest = Manifest::default();
        assert!(manifest.entries.is_empty());
        assert!(manifest.default_model.is_none());
        assert_eq!(manifest.settings, GenerationSettings::default());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let mut manifest = Manifest::default();
        manifest.upsert(entry("gemma", 100));
        manifest.upsert(entry("gemma", 200));

        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.find("gemma").unwrap().size_bytes, 200);
    }

    #[test]
    fn test_remove_nonexistent_model() {
        let mut manifest = Manifest::default();
        let result = manifest.remove("nonexistent");
        assert!(matches!(result, Err(EdgeError::ModelNotFound(_))));
    }

    #[test]
    fn test_remove_default_clears_default() {
        let mut manifest = Manifest::default();
        manifest.upsert(entry("gemma", 100));
        manifest.set_default("gemma").unwrap();

        manifest.remove("gemma").unwrap();
        assert!(manifest.default_model.is_none());
    }

    #[test]
    fn test_set_default_nonexistent() {
        let mut manifest = Manifest::default();
        assert!(manifest.set_default("nonexistent").is_err());
        assert!(manifest.default_model.is_none());
    }

    #[test]
    fn test_dangling_default_is_unset() {
        let manifest = Manifest {
            default_model: Some("gone".to_string()),
            ..Manifest::default()
        };
        assert!(manifest.default_model().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = manifest_path(temp_dir.path());

        let mut manifest = Manifest::default();
        let mut gemma = entry("gemma", 145_000_000);
        gemma.revision = Some("main".to_string());
        gemma.downloaded_at = Some("2026-01-01T00:00:00Z".to_string());
        manifest.upsert(gemma);
        manifest.upsert(entry("llama", 42));
        manifest.set_default("gemma").unwrap();
        manifest.settings.temperature = 1.1;

        manifest.save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_json_layout() {
        let mut manifest = Manifest::default();
        manifest.upsert(entry("gemma", 7));

        let value = serde_json::to_value(&manifest).unwrap();
        let record = &value["models"]["gemma"];
        assert_eq!(record["filename"], "gemma.gguf");
        assert_eq!(record["repo_id"], "owner/gemma");
        assert_eq!(record["original_filename"], "model-q4_0.gguf");
        assert_eq!(record["size"], 7);
        assert!(record.get("name").is_none());
        assert!(record.get("revision").is_none());
        assert!(value["default_model"].is_null());
        assert_eq!(value["settings"]["max_tokens"], 2048);
    }

    #[test]
    fn test_load_legacy_manifest() {
        let content = r#"{
  "models": {
    "gemma-3-1b-it-qat-q4_0-gguf": {
      "filename": "gemma-3-1b-it-qat-q4_0-gguf.gguf",
      "repo_id": "google/gemma-3-1b-it-qat-q4_0-gguf",
      "original_filename": "gemma-3-1b-it-q4_0.gguf",
      "size": 1000
    }
  },
  "default_model": null,
  "settings": {"max_tokens": 512, "temperature": 0.2, "top_p": 0.5}
}"#;
        let temp_dir = TempDir::new().unwrap();
        let path = manifest_path(temp_dir.path());
        fs::write(&path, content).unwrap();

        let manifest = Manifest::load(&path).unwrap();
        let entry = manifest.find("gemma-3-1b-it-qat-q4_0-gguf").unwrap();
        assert_eq!(entry.name, "gemma-3-1b-it-qat-q4_0-gguf");
        assert_eq!(entry.size_bytes, 1000);
        assert_eq!(manifest.settings.max_tokens, 512);
    }

    #[test]
    fn test_load_nonexistent_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Manifest::load(&temp_dir.path().join("nonexistent.json")).unwrap();
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_load_malformed_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = manifest_path(temp_dir.path());
        fs::write(&path, "{ \"models\": [").unwrap();

        let result = Manifest::load(&path);
        assert!(matches!(result, Err(EdgeError::CorruptManifest { .. })));
    }

    #[test]
    fn test_load_out_of_range_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = manifest_path(temp_dir.path());
        fs::write(
            &path,
            r#"{"models": {}, "settings": {"max_tokens": 0, "temperature": 0.7, "top_p": 0.9}}"#,
        )
        .unwrap();

        let result = Manifest::load(&path);
        assert!(matches!(result, Err(EdgeError::CorruptManifest { .. })));
    }

    #[test]
    fn test_lock_can_be_reacquired_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let lock = ManifestLock::acquire(temp_dir.path()).unwrap();
        drop(lock);
        assert!(ManifestLock::acquire(temp_dir.path()).is_ok());
    }
}
