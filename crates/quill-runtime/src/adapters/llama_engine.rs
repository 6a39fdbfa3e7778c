//! llama.cpp inference engine for the local backend.
//!
//! Loads a GGUF model once. Each generation gets a fresh context, so the
//! engine keeps no per-request state and concurrent callers are independent.
//!
//! The model file is `local.model_path` when set; otherwise `model_file` is
//! fetched from the `model_name` repository on Hugging Face into the shared
//! HF cache, so later runs load offline.

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::data_array::LlamaTokenDataArray;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::Cache;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::OnceLock;

use quill_core::text::Utf8Accumulator;
use quill_core::{Backend, ConfigError, ModelParams};

use super::local::TextGenerator;
use crate::config::LocalConfig;
use crate::providers::ProviderError;

/// llama.cpp may only be initialized once per process.
static LLAMA_BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

fn llama_backend() -> Result<&'static LlamaBackend, ConfigError> {
    LLAMA_BACKEND
        .get_or_init(|| LlamaBackend::init().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| unavailable(format!("llama.cpp init failed: {}", e)))
}

fn unavailable(reason: String) -> ConfigError {
    ConfigError::Unavailable {
        backend: Backend::Local,
        reason,
    }
}

/// Render a ChatML prompt (the format Qwen chat models are trained on).
fn chatml_prompt(system_prompt: &str, user_text: &str) -> String {
    format!(
        "<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
        system_prompt, user_text
    )
}

/// Resolve the GGUF file to load, downloading it if it is not cached yet.
fn model_file(config: &LocalConfig) -> Result<PathBuf, ConfigError> {
    if let Some(path) = &config.model_path {
        return Ok(path.clone());
    }

    tracing::info!(repo = %config.model_name, file = %config.model_file, "Resolving model from Hugging Face");
    let api = ApiBuilder::new()
        .with_progress(false)
        .build()
        .map_err(|e| unavailable(format!("Hugging Face client: {}", e)))?;
    api.model(config.model_name.clone())
        .get(&config.model_file)
        .map_err(|e| {
            unavailable(format!(
                "could not fetch {}/{}: {}",
                config.model_name, config.model_file, e
            ))
        })
}

/// Check that a model can be loaded, without loading or downloading it.
pub(crate) fn check(config: &LocalConfig) -> Result<(), ConfigError> {
    match &config.model_path {
        Some(path) if !path.is_file() => Err(ConfigError::InvalidSetting {
            name: "local.model_path",
            reason: format!("{} is not a file", path.display()),
        }),
        Some(_) => Ok(()),
        None => {
            let cached = Cache::default()
                .model(config.model_name.clone())
                .get(&config.model_file);
            if cached.is_none() {
                tracing::info!(
                    repo = %config.model_name,
                    file = %config.model_file,
                    "Model not cached; it will be downloaded on first use"
                );
            }
            Ok(())
        }
    }
}

pub(crate) struct LlamaEngine {
    backend: &'static LlamaBackend,
    model: LlamaModel,
    context_size: u32,
}

impl LlamaEngine {
    pub(crate) fn load(config: &LocalConfig) -> Result<Self, ConfigError> {
        check(config)?;
        let path = model_file(config)?;

        let backend = llama_backend()?;
        let model = LlamaModel::load_from_file(backend, &path, &LlamaModelParams::default())
            .map_err(|e| unavailable(format!("failed to load {}: {}", path.display(), e)))?;

        Ok(Self {
            backend,
            model,
            context_size: config.context_size,
        })
    }
}

fn inference(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Inference(e.to_string())
}

impl TextGenerator for LlamaEngine {
    fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        params: &ModelParams,
        sink: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), ProviderError> {
        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.context_size));
        let mut context = self
            .model
            .new_context(self.backend, ctx_params)
            .map_err(inference)?;

        let tokens = self
            .model
            .str_to_token(&chatml_prompt(system_prompt, user_text), AddBos::Always)
            .map_err(inference)?;

        let prompt_len = tokens.len();
        let budget = (self.context_size as usize).saturating_sub(prompt_len);
        let max_new = (params.max_new_tokens as usize).min(budget);
        if max_new == 0 {
            return Err(ProviderError::Inference(format!(
                "prompt of {} tokens fills the {}-token context",
                prompt_len, self.context_size
            )));
        }

        let mut batch = LlamaBatch::new(prompt_len.max(512), 1);
        for (i, token) in tokens.iter().enumerate() {
            batch
                .add(*token, i as i32, &[0], i == prompt_len - 1)
                .map_err(inference)?;
        }
        context.decode(&mut batch).map_err(inference)?;

        // Byte-level tokens can end mid-character
        let mut text = Utf8Accumulator::new();

        for n in 0..max_new {
            let mut candidates = LlamaTokenDataArray::from_iter(context.candidates(), false);
            candidates.sample_token_greedy();
            let Some(token) = candidates.selected_token() else {
                break;
            };

            if self.model.is_eog_token(token) {
                break;
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(inference)?;
            let piece = text.push(&bytes);
            if !piece.is_empty() && !sink(&piece) {
                tracing::debug!(generated = n, "Consumer gone, stopping inference");
                return Ok(());
            }

            batch.clear();
            batch
                .add(token, (prompt_len + n) as i32, &[0], true)
                .map_err(inference)?;
            context.decode(&mut batch).map_err(inference)?;
        }

        if let Some(tail) = text.finish() {
            sink(&tail);
        }
        Ok(())
    }
}
