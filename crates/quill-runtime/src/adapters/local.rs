//! Local-model adapter.
//!
//! The model is loaded once per process and shared by every adapter that
//! names the same model. Inference runs on tokio's blocking pool; decoded
//! pieces come back over a channel and are re-chunked into sentences, so
//! each sentence reaches the caller as soon as it is complete.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use quill_core::text::{truncate_input, SentenceSplitter, LOCAL_INPUT_CHAR_LIMIT};
use quill_core::{Backend, ConfigError, ModelParams};

use super::{describe_failure, error_chunk, guard_empty, Adapter, ChunkStream};
use crate::config::LocalConfig;
use crate::providers::{ErrorCategory, ProviderError};

/// A loaded model that can produce text.
pub trait TextGenerator: Send + Sync {
    /// Generate a reply, handing each decoded piece to `sink` in order.
    ///
    /// Generation stops early when `sink` returns `false`.
    fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        params: &ModelParams,
        sink: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), ProviderError>;
}

/// Loads a [`TextGenerator`] for the local backend.
pub trait ModelLoader: Send + Sync {
    fn load(&self, config: &LocalConfig) -> Result<Arc<dyn TextGenerator>, ConfigError>;

    /// Report whether [`load`](Self::load) could work, without loading.
    fn check(&self, _config: &LocalConfig) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Built-in loader: llama.cpp, unless built without the `llama-cpp` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelLoader;

#[cfg(not(feature = "llama-cpp"))]
fn engine_missing() -> ConfigError {
    ConfigError::Unavailable {
        backend: Backend::Local,
        reason: "local inference requires the 'llama-cpp' feature".to_string(),
    }
}

impl ModelLoader for DefaultModelLoader {
    #[cfg(feature = "llama-cpp")]
    fn load(&self, config: &LocalConfig) -> Result<Arc<dyn TextGenerator>, ConfigError> {
        let engine = super::llama_engine::LlamaEngine::load(config)?;
        Ok(Arc::new(engine))
    }

    #[cfg(feature = "llama-cpp")]
    fn check(&self, config: &LocalConfig) -> Result<(), ConfigError> {
        super::llama_engine::check(config)
    }

    #[cfg(not(feature = "llama-cpp"))]
    fn load(&self, _config: &LocalConfig) -> Result<Arc<dyn TextGenerator>, ConfigError> {
        Err(engine_missing())
    }

    #[cfg(not(feature = "llama-cpp"))]
    fn check(&self, _config: &LocalConfig) -> Result<(), ConfigError> {
        Err(engine_missing())
    }
}

lazy_static! {
    /// Loaded models keyed by model id.
    static ref SHARED_MODELS: Mutex<HashMap<String, Arc<dyn TextGenerator>>> =
        Mutex::new(HashMap::new());
}

fn shared_model(
    config: &LocalConfig,
    loader: &dyn ModelLoader,
) -> Result<Arc<dyn TextGenerator>, ConfigError> {
    let id = config.model_id();
    let mut models = SHARED_MODELS.lock();
    if let Some(model) = models.get(&id) {
        tracing::debug!(model = %id, "Reusing loaded model");
        return Ok(model.clone());
    }

    tracing::info!(model = %id, "Loading local model");
    let model = loader.load(config)?;
    models.insert(id.clone(), model.clone());
    tracing::info!(model = %id, "Model loaded");
    Ok(model)
}

/// Drop every shared model so the next construction reloads from disk.
pub fn reset_shared_models() {
    SHARED_MODELS.lock().clear();
}

/// Adapter over a shared local model.
pub struct LocalAdapter {
    model: Arc<dyn TextGenerator>,
    params: ModelParams,
}

impl LocalAdapter {
    /// Wrap an already-loaded model.
    pub fn new(model: Arc<dyn TextGenerator>, params: ModelParams) -> Self {
        Self { model, params }
    }

    /// Reuse the process-wide model for `config`, loading it if needed.
    pub fn load(
        config: &LocalConfig,
        params: ModelParams,
        loader: &dyn ModelLoader,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(shared_model(config, loader)?, params))
    }
}

impl Adapter for LocalAdapter {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    fn generate(&self, user_text: &str, system_prompt: &str) -> ChunkStream {
        if let Some(guard) = guard_empty(user_text) {
            return guard;
        }

        let text = truncate_input(user_text, LOCAL_INPUT_CHAR_LIMIT).into_owned();
        let system = system_prompt.to_string();
        let model = self.model.clone();
        let params = self.params;

        Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();

            let worker = tokio::task::spawn_blocking(move || {
                let mut sink = |piece: &str| tx.send(piece.to_string()).is_ok();
                model.generate(&system, &text, &params, &mut sink)
            });

            let mut splitter = SentenceSplitter::new();
            while let Some(piece) = rx.recv().await {
                for sentence in splitter.push(&piece) {
                    yield sentence;
                }
            }

            let outcome = worker.await;
            if let Some(rest) = splitter.finish() {
                yield rest;
            }

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Local generation failed");
                    yield describe_failure(&e, "local model", 1);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Local generation worker died");
                    yield error_chunk(ErrorCategory::Inference, &e.to_string());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Emits a fixed reply a few characters at a time.
    struct Scripted {
        reply: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl TextGenerator for Scripted {
        fn generate(
            &self,
            _system_prompt: &str,
            user_text: &str,
            _params: &ModelParams,
            sink: &mut dyn FnMut(&str) -> bool,
        ) -> Result<(), ProviderError> {
            self.seen.lock().push(user_text.to_string());
            let chars: Vec<char> = self.reply.chars().collect();
            for piece in chars.chunks(3) {
                let piece: String = piece.iter().collect();
                if !sink(&piece) {
                    break;
                }
            }
            Ok(())
        }
    }

    struct Failing;

    impl TextGenerator for Failing {
        fn generate(
            &self,
            _system_prompt: &str,
            _user_text: &str,
            _params: &ModelParams,
            sink: &mut dyn FnMut(&str) -> bool,
        ) -> Result<(), ProviderError> {
            sink("Partial");
            Err(ProviderError::Inference("decode failed".to_string()))
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, _config: &LocalConfig) -> Result<Arc<dyn TextGenerator>, ConfigError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Scripted::new("Hi."))
        }
    }

    #[tokio::test]
    async fn test_sentences_yielded_in_order() {
        let adapter = LocalAdapter::new(
            Scripted::new("Leo found a cave. Was the dragon inside? Yes! It slept"),
            ModelParams::default(),
        );
        let chunks: Vec<String> = adapter.generate("Tell me", "sys").collect().await;
        assert_eq!(
            chunks,
            vec![
                "Leo found a cave.",
                " Was the dragon inside?",
                " Yes!",
                " It slept"
            ]
        );
    }

    #[tokio::test]
    async fn test_long_input_truncated_before_inference() {
        let model = Scripted::new("Ok.");
        let adapter = LocalAdapter::new(model.clone(), ModelParams::default());
        let long = "a".repeat(LOCAL_INPUT_CHAR_LIMIT + 500);

        let _: Vec<String> = adapter.generate(&long, "sys").collect().await;

        let seen = model.seen.lock();
        assert_eq!(seen[0].chars().count(), LOCAL_INPUT_CHAR_LIMIT + 3);
        assert!(seen[0].ends_with("..."));
    }

    #[tokio::test]
    async fn test_blank_input_skips_model() {
        let model = Scripted::new("Never.");
        let adapter = LocalAdapter::new(model.clone(), ModelParams::default());
        let chunks: Vec<String> = adapter.generate("   ", "sys").collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(model.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_flushes_partial_then_error() {
        let adapter = LocalAdapter::new(Arc::new(Failing), ModelParams::default());
        let chunks: Vec<String> = adapter.generate("go", "sys").collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Partial");
        assert_eq!(chunks[1], "Inference Error: decode failed");
    }

    /// Produces sentences until the consumer goes away.
    struct Endless {
        stopped: AtomicBool,
    }

    impl TextGenerator for Endless {
        fn generate(
            &self,
            _system_prompt: &str,
            _user_text: &str,
            _params: &ModelParams,
            sink: &mut dyn FnMut(&str) -> bool,
        ) -> Result<(), ProviderError> {
            for _ in 0..1_000_000 {
                if !sink("More. ") {
                    self.stopped.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_micros(50));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abandoned_stream_stops_generation() {
        let model = Arc::new(Endless {
            stopped: AtomicBool::new(false),
        });
        let adapter = LocalAdapter::new(model.clone(), ModelParams::default());

        let mut stream = adapter.generate("count", "sys");
        assert_eq!(stream.next().await.as_deref(), Some("More."));
        drop(stream);

        for _ in 0..200 {
            if model.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(model.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_model_loaded_once_per_id() {
        let loader = CountingLoader {
            loads: AtomicUsize::new(0),
        };
        let config = LocalConfig {
            model_name: "test/shared-once".to_string(),
            ..LocalConfig::default()
        };

        let a = LocalAdapter::load(&config, ModelParams::default(), &loader).unwrap();
        let b = LocalAdapter::load(&config, ModelParams::default(), &loader).unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.model, &b.model));
    }

    #[cfg(not(feature = "llama-cpp"))]
    #[test]
    fn test_default_loader_without_engine_is_unavailable() {
        let err = DefaultModelLoader
            .load(&LocalConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::Unavailable {
                backend: Backend::Local,
                ..
            }
        ));
        assert_eq!(DefaultModelLoader.check(&LocalConfig::default()), Err(err));
    }

    #[cfg(feature = "llama-cpp")]
    #[test]
    fn test_default_loader_checks_model_path() {
        let config = LocalConfig {
            model_path: Some(std::path::PathBuf::from("/nonexistent/quill/model.gguf")),
            ..LocalConfig::default()
        };
        assert!(DefaultModelLoader.check(&config).is_err());
        assert!(DefaultModelLoader.check(&LocalConfig::default()).is_ok());
    }
}
