//! Seam between the registry and the local inference runtime.
//!
//! A [`Runtime`] loads a model file into a [`Generator`]; the generator turns
//! a prompt into text. The llama.cpp implementation lives behind the `llama`
//! cargo feature.

#[cfg(feature = "llama")]
pub mod llama;

use crate::config::GenerationSettings;
use crate::error::Result;
use std::path::Path;
use std::sync::atomic::AtomicBool;

#[cfg(feature = "llama")]
pub use llama::LlamaRuntime;

/// Parameters fixed when a model is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub context_size: u32,
    pub threads: usize,
}

/// One generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: &'a [String],
}

impl<'a> GenerateRequest<'a> {
    #[must_use]
    pub const fn new(prompt: &'a str, settings: &GenerationSettings, stop: &'a [String]) -> Self {
        Self {
            prompt,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            stop,
        }
    }
}

/// A loaded model
pub trait Generator: Send {
    /// Generate a completion for `request.prompt`.
    ///
    /// Stops early at a stop sequence (which is not included), at end of
    /// generation, or once `cancel` is set; the text produced so far is returned.
    fn generate(&mut self, request: &GenerateRequest<'_>, cancel: &AtomicBool) -> Result<String>;
}

/// Loads model files
pub trait Runtime: Send {
    fn load(&self, path: &Path, params: &LoadParams) -> Result<Box<dyn Generator>>;
}

/// Runtime compiled into this binary
#[cfg(feature = "llama")]
pub fn default_runtime() -> Result<Box<dyn Runtime>> {
    Ok(Box::new(LlamaRuntime))
}

/// Runtime compiled into this binary
#[cfg(not(feature = "llama"))]
pub fn default_runtime() -> Result<Box<dyn Runtime>> {
    Err(crate::error::EdgeError::InferenceFailed(
        "easy-edge was built without llama.cpp support; rebuild with `--features llama`"
            .to_string(),
    ))
}

/// Byte offset of the earliest stop sequence in `text`
#[must_use]
pub fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Reassembles text from token pieces that may split a UTF-8 sequence
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Append a token's bytes and return the text completed by them.
    ///
    /// A trailing incomplete sequence is held back for the next call; bytes
    /// that can never form a character become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(complete) => {
                    text.push_str(complete);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still pending once generation ends
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
