use std::path::PathBuf;
use thiserror::Error;

/// Main error type for easy-edge
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("Unsupported model source: {0}\n\nTroubleshooting:\n- Use a Hugging Face file link: https://huggingface.co/<owner>/<repo>/resolve/<ref>/<file>\n- Or pass --repo-id <owner>/<repo> --filename <file>")]
    UnsupportedSource(String),

    #[error("Model '{0}' not found\n\nTroubleshooting:\n- List installed models: easy-edge list\n- Download it first: easy-edge pull --url <url>")]
    ModelNotFound(String),

    #[error("Failed to download {source_id}: {cause}\n\nTroubleshooting:\n- Check internet connection\n- Verify the repository and file name on the hub\n- Gated repositories need a token in HF_TOKEN")]
    DownloadFailed { source_id: String, cause: String },

    #[error("Corrupt manifest at {}: {reason}\n\nTroubleshooting:\n- Fix or move the file aside; a fresh manifest is created when it is missing\n- Model files in the same directory are left untouched", path.display())]
    CorruptManifest { path: PathBuf, reason: String },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/easy-edge/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EdgeError {
    /// Build a download failure for `source_id` from any displayable cause
    pub fn download(source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::DownloadFailed {
            source_id: source_id.into(),
            cause: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EdgeError>;
