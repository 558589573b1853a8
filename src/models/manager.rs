use crate::config::{Config, GenerationSettings, SettingsPatch};
use crate::error::{EdgeError, Result};
use crate::models::download::{Fetcher, HubFetcher, ModelDownloader};
use crate::models::manifest::{manifest_path, Manifest, ManifestLock, ModelEntry};
use crate::models::resolver::{canonical_filename, ModelSource, Resolver};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// One row of [`ModelManager::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStatus<'a> {
    pub name: &'a str,
    pub size_bytes: u64,
    /// Checked against the file system at call time
    pub present: bool,
    pub is_default: bool,
}

/// Result of [`ModelManager::pull`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub already_present: bool,
}

/// Result of [`ModelManager::remove`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedModel {
    pub entry: ModelEntry,
    /// File that was deleted, or would have been
    pub path: PathBuf,
    /// False when the file was already gone
    pub file_deleted: bool,
}

/// Model manager for pulling, listing, and removing models
pub struct ModelManager<F = HubFetcher> {
    models_dir: PathBuf,
    manifest_path: PathBuf,
    manifest: Manifest,
    resolver: Resolver,
    downloader: ModelDownloader<F>,
}

impl ModelManager<HubFetcher> {
    /// Manager backed by the configured hub
    pub fn new(config: &Config, models_dir: PathBuf) -> Result<Self> {
        let fetcher = HubFetcher::new(&config.hub)?;
        Self::with_fetcher(models_dir, Resolver::for_endpoint(&config.hub.endpoint), fetcher)
    }
}

impl<F: Fetcher> ModelManager<F> {
    /// Load the manifest of `models_dir` and fetch through `fetcher`
    pub fn with_fetcher(models_dir: PathBuf, resolver: Resolver, fetcher: F) -> Result<Self> {
        let manifest_path = manifest_path(&models_dir);
        let manifest = Manifest::load(&manifest_path)?;
        tracing::debug!(
            "Loaded {} model(s) from {}",
            manifest.entries.len(),
            manifest_path.display()
        );

        Ok(Self {
            downloader: ModelDownloader::new(models_dir.clone(), fetcher),
            models_dir,
            manifest_path,
            manifest,
            resolver,
        })
    }

    /// Toggle the download progress indicator
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.downloader = self.downloader.with_progress(show_progress);
        self
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Resolve, download if needed, and record a model
    pub async fn pull(&mut self, source: &ModelSource) -> Result<PullOutcome> {
        let resolved = self.resolver.resolve(source)?;
        let download = self.downloader.download(&resolved).await?;

        let outcome = PullOutcome {
            name: resolved.model_name.clone(),
            path: download.path,
            size_bytes: download.size_bytes,
            already_present: download.already_present,
        };

        // A file that was already in place keeps the record it has
        if outcome.already_present && self.manifest.find(&outcome.name).is_some() {
            return Ok(outcome);
        }

        let entry = ModelEntry {
            name: resolved.model_name.clone(),
            filename: resolved.canonical_filename(),
            source_repo: resolved.repo_id.clone(),
            original_filename: resolved.original_filename().to_string(),
            size_bytes: download.size_bytes,
            revision: Some(resolved.revision.clone()),
            downloaded_at: (!download.already_present).then(|| chrono::Utc::now().to_rfc3339()),
        };

        self.update(|manifest| {
            manifest.upsert(entry);
            Ok(())
        })?;

        Ok(outcome)
    }

    /// Every tracked model, with presence checked on disk
    pub fn list(&self) -> impl Iterator<Item = ModelStatus<'_>> + '_ {
        let default = self.manifest.default_model();
        self.manifest.entries.values().map(move |entry| ModelStatus {
            name: &entry.name,
            size_bytes: entry.size_bytes,
            present: self.entry_path(entry).is_file(),
            is_default: default == Some(entry.name.as_str()),
        })
    }

    /// Path of a model whose entry and file both exist
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        self.manifest
            .find(name)
            .map(|entry| self.entry_path(entry))
            .filter(|path| path.is_file())
            .ok_or_else(|| EdgeError::ModelNotFound(name.to_string()))
    }

    /// Delete a model's file, then its record
    pub fn remove(&mut self, name: &str) -> Result<RemovedModel> {
        // Unknown names must not touch the directory, not even the lock file
        if Manifest::load(&self.manifest_path)?.find(name).is_none() {
            return Err(EdgeError::ModelNotFound(name.to_string()));
        }

        let models_dir = self.models_dir.clone();
        self.update(|manifest| {
            let entry = manifest
                .find(name)
                .cloned()
                .ok_or_else(|| EdgeError::ModelNotFound(name.to_string()))?;

            let path = entry_path(&models_dir, &entry);
            let file_deleted = match fs::remove_file(&path) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("Model file {} was already missing", path.display());
                    false
                }
                Err(e) => return Err(e.into()),
            };

            manifest.remove(name)?;
            tracing::info!("Removed model '{name}'");
            Ok(RemovedModel {
                entry,
                path,
                file_deleted,
            })
        })
    }

    /// Make `name` the model used when none is given
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if self.manifest.find(name).is_none() {
            return Err(EdgeError::ModelNotFound(name.to_string()));
        }
        self.update(|manifest| manifest.set_default(name))
    }

    #[must_use]
    pub fn default_model(&self) -> Option<&str> {
        self.manifest.default_model()
    }

    #[must_use]
    pub const fn settings(&self) -> GenerationSettings {
        self.manifest.settings
    }

    /// Validate and persist new generation settings
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<GenerationSettings> {
        self.settings().patched(patch)?;
        self.update(|manifest| manifest.update_settings(patch))
    }

    #[must_use]
    pub fn info(&self, name: &str) -> Option<&ModelEntry> {
        self.manifest.find(name)
    }

    fn entry_path(&self, entry: &ModelEntry) -> PathBuf {
        entry_path(&self.models_dir, entry)
    }

    /// Read-modify-write of the manifest under the directory lock
    fn update<T>(&mut self, mutate: impl FnOnce(&mut Manifest) -> Result<T>) -> Result<T> {
        let _lock = ManifestLock::acquire(&self.models_dir)?;

        // Another invocation may have written since we loaded
        let mut manifest = Manifest::load(&self.manifest_path)?;
        let value = mutate(&mut manifest)?;
        manifest.save(&self.manifest_path)?;

        self.manifest = manifest;
        Ok(value)
    }
}

/// Location of an entry's file; names that escape the directory fall back to the canonical name
fn entry_path(models_dir: &Path, entry: &ModelEntry) -> PathBuf {
    let relative = Path::new(&entry.filename);
    let contained = !entry.filename.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if contained {
        models_dir.join(relative)
    } else {
        tracing::warn!(
            "Ignoring unsafe file name '{}' for model '{}'",
            entry.filename,
            entry.name
        );
        models_dir.join(canonical_filename(&entry.name))
    }
}
