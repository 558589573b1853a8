use crate::error::{EdgeError, Result};
use reqwest::Url;

/// Hosts accepted in model URLs without extra configuration
pub const HUB_HOSTS: &[&str] = &["huggingface.co", "www.huggingface.co", "hf.co"];

/// Revision used when the source does not name one
pub const DEFAULT_REVISION: &str = "main";

/// Extension of every canonical model file
pub const MODEL_EXTENSION: &str = "gguf";

/// A user-supplied reference to a remote model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// `https://<hub>/<owner>/<repo>/resolve/<ref>/<file>`
    Url(String),
    /// Explicit repository and file name
    Repo {
        repo_id: String,
        filename: String,
        revision: Option<String>,
    },
}

/// Outcome of resolving a [`ModelSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub model_name: String,
    pub repo_id: String,
    /// Path of the file inside the repository
    pub filename: String,
    pub revision: String,
}

impl ResolvedSource {
    /// `<model_name>.gguf`, whatever the remote extension
    #[must_use]
    pub fn canonical_filename(&self) -> String {
        canonical_filename(&self.model_name)
    }

    /// Identifier used in messages and errors
    #[must_use]
    pub fn source_id(&self) -> String {
        format!("{}/{}", self.repo_id, self.filename)
    }

    /// Last path component of the remote file
    #[must_use]
    pub fn original_filename(&self) -> &str {
        self.filename.rsplit('/').next().unwrap_or(&self.filename)
    }
}

/// Canonical file name for a model name
#[must_use]
pub fn canonical_filename(model_name: &str) -> String {
    format!("{model_name}.{MODEL_EXTENSION}")
}

/// Maps sources to canonical model names
#[derive(Debug, Clone)]
pub struct Resolver {
    hosts: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            hosts: HUB_HOSTS.iter().map(|h| (*h).to_string()).collect(),
        }
    }
}

impl Resolver {
    /// Default hosts plus the host of a custom hub endpoint
    #[must_use]
    pub fn for_endpoint(endpoint: &str) -> Self {
        let mut resolver = Self::default();
        if let Some(host) = Url::parse(endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        {
            if !resolver.hosts.contains(&host) {
                resolver.hosts.push(host);
            }
        }
        resolver
    }

    /// Accept exactly the given hosts
    #[must_use]
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn resolve(&self, source: &ModelSource) -> Result<ResolvedSource> {
        let resolved = match source {
            ModelSource::Url(url) => self.resolve_url(url)?,
            ModelSource::Repo {
                repo_id,
                filename,
                revision,
            } => resolve_repo(repo_id, filename, revision.as_deref())?,
        };

        tracing::debug!(
            "Resolved {} to model '{}' ({})",
            resolved.source_id(),
            resolved.model_name,
            resolved.revision
        );
        Ok(resolved)
    }

    fn resolve_url(&self, raw: &str) -> Result<ResolvedSource> {
        let unsupported = |why: &str| EdgeError::UnsupportedSource(format!("{raw} ({why})"));

        let url = Url::parse(raw.trim()).map_err(|e| unsupported(&e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(unsupported("not an http(s) URL"));
        }

        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| unsupported("missing host"))?;
        if !self.hosts.contains(&host) {
            return Err(unsupported("not a recognized model hub"));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        // owner / repo / resolve / ref / file...
        if segments.len() < 5 {
            return Err(unsupported("expected /<owner>/<repo>/resolve/<ref>/<file>"));
        }
        if !matches!(segments[2], "resolve" | "blob") {
            return Err(unsupported("expected a /resolve/ file link"));
        }

        let repo_id = format!("{}/{}", segments[0], segments[1]);
        let model_name = validate_name(segments[1], raw)?;

        Ok(ResolvedSource {
            model_name,
            repo_id,
            filename: segments[4..].join("/"),
            revision: segments[3].to_string(),
        })
    }
}

fn resolve_repo(repo_id: &str, filename: &str, revision: Option<&str>) -> Result<ResolvedSource> {
    let repo_id = repo_id.trim().trim_matches('/');
    let filename = filename.trim().trim_start_matches('/');

    if filename.is_empty() {
        return Err(EdgeError::UnsupportedSource(format!(
            "{repo_id} (empty file name)"
        )));
    }

    let last = repo_id.rsplit('/').next().unwrap_or(repo_id);
    let model_name = validate_name(last, repo_id)?;

    Ok(ResolvedSource {
        model_name,
        repo_id: repo_id.to_string(),
        filename: filename.to_string(),
        revision: revision
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVISION)
            .to_string(),
    })
}

/// A model name must be usable as a single file name component
fn validate_name(name: &str, origin: &str) -> Result<String> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(EdgeError::UnsupportedSource(format!(
            "{origin} (cannot derive a model name)"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> ModelSource {
        ModelSource::Url(s.to_string())
    }

    #[test]
    fn test_resolve_hub_url() {
        let resolved = Resolver::default()
            .resolve(&url("https://huggingface.co/google/gemma-3-1b-it-qat-q4_0-gguf/resolve/main/gemma-3-1b-it-q4_0.gguf"))
            .unwrap();

        assert_eq!(resolved.model_name, "gemma-3-1b-it-qat-q4_0-gguf");
        assert_eq!(resolved.repo_id, "google/gemma-3-1b-it-qat-q4_0-gguf");
        assert_eq!(resolved.filename, "gemma-3-1b-it-q4_0.gguf");
        assert_eq!(resolved.revision, "main");
        assert_eq!(
            resolved.canonical_filename(),
            "gemma-3-1b-it-qat-q4_0-gguf.gguf"
        );
    }

    #[test]
    fn test_resolve_custom_host() {
        let resolver = Resolver::with_hosts(["hub.example"]);
        let resolved = resolver
            .resolve(&url("https://hub.example/google/gemma-3-1b-it-qat-q4_0-gguf/resolve/main/gemma-3-1b-it-q4_0.gguf"))
            .unwrap();
        assert_eq!(resolved.model_name, "gemma-3-1b-it-qat-q4_0-gguf");

        let rejected = resolver.resolve(&url(
            "https://huggingface.co/google/gemma/resolve/main/gemma.gguf",
        ));
        assert!(matches!(rejected, Err(EdgeError::UnsupportedSource(_))));
    }

    #[test]
    fn test_for_endpoint_adds_host() {
        let resolver = Resolver::for_endpoint("https://mirror.internal:8443");
        let resolved = resolver
            .resolve(&url("https://mirror.internal:8443/org/model/resolve/v1/model.Q4.gguf"))
            .unwrap();
        assert_eq!(resolved.model_name, "model");
        assert_eq!(resolved.revision, "v1");
    }

    #[test]
    fn test_blob_link_and_subfolder() {
        let resolved = Resolver::default()
            .resolve(&url("https://hf.co/TheBloke/Llama-2-7B-Chat-GGUF/blob/main/q4/llama-2-7b-chat.Q4_K_M.gguf"))
            .unwrap();
        assert_eq!(resolved.model_name, "Llama-2-7B-Chat-GGUF");
        assert_eq!(resolved.filename, "q4/llama-2-7b-chat.Q4_K_M.gguf");
        assert_eq!(resolved.original_filename(), "llama-2-7b-chat.Q4_K_M.gguf");
    }

    #[test]
    fn test_reject_foreign_host() {
        let result = Resolver::default().resolve(&url(
            "https://example.com/google/gemma/resolve/main/gemma.gguf",
        ));
        assert!(matches!(result, Err(EdgeError::UnsupportedSource(_))));
    }

    #[test]
    fn test_reject_short_path() {
        for raw in [
            "https://huggingface.co/google/gemma",
            "https://huggingface.co/google/gemma/resolve/main",
            "https://huggingface.co/google/gemma/tree/main/file.gguf",
            "ftp://huggingface.co/google/gemma/resolve/main/file.gguf",
            "not a url",
        ] {
            let result = Resolver::default().resolve(&url(raw));
            assert!(
                matches!(result, Err(EdgeError::UnsupportedSource(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_resolve_repo_pair() {
        let resolved = Resolver::default()
            .resolve(&ModelSource::Repo {
                repo_id: "TheBloke/Llama-2-7B-Chat-GGUF".to_string(),
                filename: "llama-2-7b-chat.Q4_K_M.gguf".to_string(),
                revision: None,
            })
            .unwrap();
        assert_eq!(resolved.model_name, "Llama-2-7B-Chat-GGUF");
        assert_eq!(resolved.revision, DEFAULT_REVISION);
        assert_eq!(resolved.canonical_filename(), "Llama-2-7B-Chat-GGUF.gguf");
    }

    #[test]
    fn test_resolve_repo_without_owner() {
        let resolved = Resolver::default()
            .resolve(&ModelSource::Repo {
                repo_id: "gpt2".to_string(),
                filename: "gpt2.gguf".to_string(),
                revision: Some("refs/pr/1".to_string()),
            })
            .unwrap();
        assert_eq!(resolved.model_name, "gpt2");
        assert_eq!(resolved.revision, "refs/pr/1");
    }

    #[test]
    fn test_reject_bad_repo_pair() {
        let empty_file = Resolver::default().resolve(&ModelSource::Repo {
            repo_id: "owner/model".to_string(),
            filename: "  ".to_string(),
            revision: None,
        });
        assert!(matches!(empty_file, Err(EdgeError::UnsupportedSource(_))));

        let dotdot = Resolver::default().resolve(&ModelSource::Repo {
            repo_id: "owner/..".to_string(),
            filename: "model.gguf".to_string(),
            revision: None,
        });
        assert!(matches!(dotdot, Err(EdgeError::UnsupportedSource(_))));
    }
}
