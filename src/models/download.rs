use crate::config::HubConfig;
use crate::error::{EdgeError, Result};
use crate::models::resolver::{canonical_filename, ResolvedSource};
use async_trait::async_trait;
use futures_util::StreamExt;
use hf_hub::{Repo, RepoType};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Leading bytes of every GGUF file
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// File delivered by a [`Fetcher`]
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Where the fetcher left the bytes, inside the destination directory
    pub path: PathBuf,
    /// Length advertised by the remote, when known
    pub expected_bytes: Option<u64>,
}

/// Transfers a remote file into a local directory.
///
/// Implementations must not leave partial files behind when they fail or when
/// the returned future is dropped.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &ResolvedSource,
        dest_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<Fetched>;
}

/// Result of [`ModelDownloader::download`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Canonical file already existed, nothing was fetched
    pub already_present: bool,
}

/// Removes a file on drop unless it was kept
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard and hand back the path
    #[must_use]
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            tracing::debug!("Removing partial file {}", self.path.display());
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove partial file {}: {e}", self.path.display());
            }
        }
    }
}

/// Places remote model files at their canonical path
pub struct ModelDownloader<F> {
    models_dir: PathBuf,
    fetcher: F,
    show_progress: bool,
}

impl<F: Fetcher> ModelDownloader<F> {
    #[must_use]
    pub fn new(models_dir: PathBuf, fetcher: F) -> Self {
        Self {
            models_dir,
            fetcher,
            show_progress: true,
        }
    }

    /// Toggle the terminal progress indicator
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fetch `source` unless its canonical file is already in place
    pub async fn download(&self, source: &ResolvedSource) -> Result<Download> {
        let canonical = self.model_path(&source.model_name);

        if canonical.exists() {
            tracing::info!(
                "Model {} already exists at {}",
                source.model_name,
                canonical.display()
            );
            return Ok(Download {
                size_bytes: fs::metadata(&canonical)?.len(),
                path: canonical,
                already_present: true,
            });
        }

        fs::create_dir_all(&self.models_dir)?;
        let source_id = source.source_id();
        tracing::info!("Downloading {source_id} (revision {})", source.revision);

        let progress = self.progress_bar(&source.model_name);
        let fetched = match self
            .fetcher
            .fetch(source, &self.models_dir, &progress)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                progress
                    .abandon_with_message(format!("Download of {} failed", source.model_name));
                return Err(e);
            }
        };

        // Staged bytes are discarded unless they reach the canonical path
        let staged = PartialFile::new(fetched.path.clone());
        let size_bytes = verify(&fetched, &source_id)?;

        if !has_gguf_magic(&fetched.path) {
            tracing::warn!("{source_id} does not look like a GGUF file");
        }

        fs::rename(&fetched.path, &canonical).map_err(|e| {
            EdgeError::download(&source_id, format!("failed to move into place: {e}"))
        })?;
        let _ = staged.keep();

        progress.finish_with_message(format!(
            "Downloaded {} ({})",
            source.model_name,
            format_bytes(size_bytes)
        ));
        tracing::info!("Stored {} at {}", source.model_name, canonical.display());

        Ok(Download {
            path: canonical,
            size_bytes,
            already_present: false,
        })
    }

    /// Canonical path of a model in the managed directory
    #[must_use]
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.models_dir.join(canonical_filename(model_name))
    }

    fn progress_bar(&self, model_name: &str) -> ProgressBar {
        let bar = if self.show_progress {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(spinner_style());
        bar.set_message(format!("Downloading {model_name}"));
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

/// Check the staged file against what the remote announced
fn verify(fetched: &Fetched, source_id: &str) -> Result<u64> {
    let on_disk = fs::metadata(&fetched.path)
        .map_err(|e| EdgeError::download(source_id, format!("downloaded file missing: {e}")))?
        .len();

    if on_disk == 0 {
        return Err(EdgeError::download(source_id, "downloaded file is empty"));
    }

    if let Some(expected) = fetched.expected_bytes {
        if on_disk != expected {
            return Err(EdgeError::download(
                source_id,
                format!("incomplete download: {on_disk} of {expected} bytes"),
            ));
        }
    }

    Ok(on_disk)
}

fn has_gguf_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    fs::File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .is_ok()
        && &magic == GGUF_MAGIC
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%, {eta})",
    )
    .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("#>-"))
}

/// Switch `progress` to a percentage bar once the total size is known
pub fn start_transfer(progress: &ProgressBar, total: Option<u64>) {
    if let Some(total) = total.filter(|&t| t > 0) {
        progress.set_length(total);
        progress.set_style(bar_style());
    }
}

/// Streams files from a Hugging Face compatible hub
#[derive(Debug, Clone)]
pub struct HubFetcher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    idle_timeout: Duration,
}

impl HubFetcher {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(concat!("easy-edge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EdgeError::Other(format!("Failed to create HTTP client: {e}")))?;

        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_some() {
            tracing::debug!("Using hub token from ${}", config.token_env);
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs.max(1)),
        })
    }

    /// Download URL of a resolved file
    #[must_use]
    pub fn file_url(&self, source: &ResolvedSource) -> String {
        let repo = Repo::with_revision(
            source.repo_id.clone(),
            RepoType::Model,
            source.revision.clone(),
        );
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint,
            repo.url(),
            repo.url_revision(),
            source.filename
        )
    }
}

#[async_trait]
impl Fetcher for HubFetcher {
    async fn fetch(
        &self,
        source: &ResolvedSource,
        dest_dir: &Path,
        progress: &ProgressBar,
    ) -> Result<Fetched> {
        let source_id = source.source_id();
        let url = self.file_url(source);
        tracing::debug!("GET {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let stalled = || {
            EdgeError::download(
                &source_id,
                format!("no data from hub for {}s", self.idle_timeout.as_secs()),
            )
        };

        let response = tokio::time::timeout(self.idle_timeout, request.send())
            .await
            .map_err(|_| stalled())?
            .map_err(|e| EdgeError::download(&source_id, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EdgeError::download(
                &source_id,
                "file not found on hub (HTTP 404)",
            ));
        }
        if !status.is_success() {
            return Err(EdgeError::download(
                &source_id,
                format!("hub returned HTTP {status}"),
            ));
        }

        let expected_bytes = response.content_length();
        start_transfer(progress, expected_bytes);

        let staging = dest_dir.join(format!("{}.part", source.original_filename()));
        let guard = PartialFile::new(staging.clone());

        let write_err = |e: std::io::Error| {
            EdgeError::download(&source_id, format!("write to {}: {e}", staging.display()))
        };

        let mut file = tokio::fs::File::create(&staging).await.map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = tokio::time::timeout(self.idle_timeout, stream.next())
            .await
            .map_err(|_| stalled())?
        {
            let chunk = chunk.map_err(|e| EdgeError::download(&source_id, e))?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tracing::debug!("Fetched {written} bytes for {source_id}");

        Ok(Fetched {
            path: guard.keep(),
            expected_bytes,
        })
    }
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
