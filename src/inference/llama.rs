//! GGUF inference through llama.cpp.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::error::{EdgeError, Result};
use crate::inference::{find_stop, GenerateRequest, Generator, LoadParams, Runtime, Utf8Decoder};

/// Tokens per decode call while ingesting the prompt
const PREFILL_BATCH_SIZE: usize = 512;

fn failed(e: impl std::fmt::Display) -> EdgeError {
    EdgeError::InferenceFailed(e.to_string())
}

/// Loads GGUF files with llama.cpp
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaRuntime;

impl Runtime for LlamaRuntime {
    fn load(&self, path: &Path, params: &LoadParams) -> Result<Box<dyn Generator>> {
        let backend = LlamaBackend::init().map_err(failed)?;

        let model = LlamaModel::load_from_file(&backend, path, &LlamaModelParams::default())
            .map_err(|e| failed(format!("failed to load {}: {e}", path.display())))?;

        tracing::info!(
            "Loaded {} (context {}, {} threads)",
            path.display(),
            params.context_size,
            params.threads
        );

        Ok(Box::new(LlamaGenerator {
            backend,
            model,
            params: *params,
        }))
    }
}

pub struct LlamaGenerator {
    backend: LlamaBackend,
    model: LlamaModel,
    params: LoadParams,
}

impl LlamaGenerator {
    fn sampler(request: &GenerateRequest<'_>) -> LlamaSampler {
        if request.temperature <= 0.0 {
            return LlamaSampler::greedy();
        }

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(1234, |d| d.subsec_nanos());

        LlamaSampler::chain_simple([
            LlamaSampler::top_p(request.top_p, 1),
            LlamaSampler::temp(request.temperature),
            LlamaSampler::dist(seed),
        ])
    }
}

impl Generator for LlamaGenerator {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn generate(&mut self, request: &GenerateRequest<'_>, cancel: &AtomicBool) -> Result<String> {
        let n_ctx = NonZeroU32::new(self.params.context_size)
            .ok_or_else(|| failed("context size must be greater than 0"))?;
        let threads = self.params.threads as i32;

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_threads(threads)
            .with_n_threads_batch(threads);

        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(failed)?;

        let tokens = self
            .model
            .str_to_token(request.prompt, AddBos::Always)
            .map_err(failed)?;

        let context_size = self.params.context_size as usize;
        if tokens.len() >= context_size {
            return Err(failed(format!(
                "prompt is {} tokens, context holds {context_size}",
                tokens.len()
            )));
        }
        let max_tokens = (request.max_tokens as usize).min(context_size - tokens.len());

        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last_pos = tokens.len() as i32 - 1;

        // Prefill in chunks so one decode never exceeds the batch size
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for (j, &token) in chunk.iter().enumerate() {
                let p = pos + j as i32;
                batch.add(token, p, &[0], p == last_pos).map_err(failed)?;
            }
            ctx.decode(&mut batch).map_err(failed)?;
            pos += chunk.len() as i32;
        }

        let mut sampler = Self::sampler(request);
        let mut output = String::new();
        let mut decoder = Utf8Decoder::default();
        let mut n_cur = tokens.len() as i32;

        for _ in 0..max_tokens {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("Generation cancelled");
                break;
            }

            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            // Byte-fallback tokens may carry part of a character
            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(failed)?;
            output.push_str(&decoder.push(&bytes));

            if let Some(at) = find_stop(&output, request.stop) {
                output.truncate(at);
                return Ok(output);
            }

            batch.clear();
            batch.add(token, n_cur, &[0], true).map_err(failed)?;
            n_cur += 1;

            ctx.decode(&mut batch).map_err(failed)?;
        }

        output.push_str(&decoder.finish());
        if let Some(at) = find_stop(&output, request.stop) {
            output.truncate(at);
        }
        Ok(output)
    }
}
