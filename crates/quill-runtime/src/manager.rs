//! Backend manager.
//!
//! The single entry point for feedback requests. The manager owns the
//! adapter cache, decides which backend is active, and converts every
//! failure into text so callers only ever see chunks.
//!
//! # State machine
//!
//! ```text
//! Uninitialized --initialize--> Ready(b)
//!       |                          |
//!       +------ failure ----> Failed(b) --initialize--> ...
//! ```
//!
//! Construction is serialized by a dedicated build lock, so concurrent
//! `initialize` calls for the same backend build its adapter at most once.
//! The state lock is never held while an adapter (and possibly a model) is
//! being built, so `state()` and in-flight feedback streams stay responsive.

use futures::StreamExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use quill_core::prompts::AUTOCOMPLETE_TOO_SHORT_MESSAGE;
use quill_core::{Backend, ConfigError, PromptKind};

use crate::adapters::{
    error_chunk, single_chunk, Adapter, AdapterFactory, ChunkStream, DefaultAdapterFactory,
};
use crate::config::Config;
use crate::providers::ErrorCategory;

/// Chunk yielded when no backend could be initialized.
pub const INIT_FAILURE_MESSAGE: &str =
    "Error: Failed to initialize model. Please check your configuration and API keys.";

/// Lifecycle of the manager's active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Ready(Backend),
    /// The last attempt for this backend failed; retryable
    Failed(Backend),
}

struct Inner {
    config: Config,
    state: ManagerState,
    adapters: HashMap<Backend, Arc<dyn Adapter>>,
    /// Bumped by `reconfigure`; a build started under an older epoch is discarded
    epoch: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    build: Mutex<()>,
    factory: Arc<dyn AdapterFactory>,
}

/// Owns adapter lifecycle and routes feedback requests.
///
/// Cloning is cheap; clones share the same cache and state.
#[derive(Clone)]
pub struct BackendManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("BackendManager")
            .field("state", &inner.state)
            .field("cached", &inner.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendManager {
    /// Create a manager with the built-in adapters.
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, Arc::new(DefaultAdapterFactory::new()))
    }

    /// Create a manager that builds adapters with `factory`.
    pub fn with_factory(config: Config, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    config,
                    state: ManagerState::Uninitialized,
                    adapters: HashMap::new(),
                    epoch: 0,
                }),
                build: Mutex::new(()),
                factory,
            }),
        }
    }

    /// Make `backend` (or the configured default) active.
    ///
    /// Returns `true` immediately if that backend is already active. Cached
    /// adapters for other backends are kept. Never panics or errors: failures
    /// are logged and reported as `false`.
    pub fn initialize(&self, backend: Option<Backend>) -> bool {
        let _building = self.shared.build.lock();

        let (target, config, cached, epoch) = {
            let inner = self.shared.inner.lock();
            let target = backend.unwrap_or(inner.config.backend);
            if inner.state == ManagerState::Ready(target) {
                return true;
            }
            let cached = inner.adapters.get(&target).cloned();
            (target, inner.config.clone(), cached, inner.epoch)
        };

        tracing::info!(backend = %target, "Initializing backend");
        let built = self.build_adapter(&config, cached, target);

        let mut inner = self.shared.inner.lock();
        if inner.epoch != epoch {
            tracing::warn!(backend = %target, "Configuration replaced during initialization, discarding");
            return false;
        }

        match built {
            Ok(adapter) => {
                inner.adapters.insert(target, adapter);
                inner.state = ManagerState::Ready(target);
                tracing::info!(backend = %target, "Backend ready");
                true
            }
            Err(e) => {
                tracing::error!(backend = %target, error = %e, "Backend initialization failed");
                inner.state = ManagerState::Failed(target);
                false
            }
        }
    }

    fn build_adapter(
        &self,
        config: &Config,
        cached: Option<Arc<dyn Adapter>>,
        target: Backend,
    ) -> Result<Arc<dyn Adapter>, ConfigError> {
        config.validate_for(target)?;

        if let Some(adapter) = cached {
            tracing::debug!(backend = %target, "Reusing cached adapter");
            return Ok(adapter);
        }

        let factory = &self.shared.factory;
        catch_unwind(AssertUnwindSafe(|| factory.create(target, config))).unwrap_or_else(
            |panic| {
                Err(ConfigError::Unavailable {
                    backend: target,
                    reason: format!("adapter construction panicked: {}", panic_message(&*panic)),
                })
            },
        )
    }

    pub fn state(&self) -> ManagerState {
        self.shared.inner.lock().state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state(), ManagerState::Ready(_))
    }

    /// The active backend, if initialized.
    pub fn active_backend(&self) -> Option<Backend> {
        match self.state() {
            ManagerState::Ready(b) => Some(b),
            _ => None,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.shared.inner.lock().config.clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// On success every cached adapter is dropped (credentials or endpoints
    /// may have changed) and the manager returns to `Uninitialized`. On
    /// failure nothing changes.
    pub fn reconfigure(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        let mut inner = self.shared.inner.lock();
        inner.config = config;
        inner.adapters.clear();
        inner.state = ManagerState::Uninitialized;
        inner.epoch += 1;
        tracing::info!(backend = %inner.config.backend, "Manager reconfigured");
        Ok(())
    }

    fn active_adapter(&self) -> Option<Arc<dyn Adapter>> {
        let inner = self.shared.inner.lock();
        match inner.state {
            ManagerState::Ready(b) => inner.adapters.get(&b).cloned(),
            _ => None,
        }
    }

    /// Stream feedback for `text`.
    ///
    /// Autocomplete input shorter than the configured minimum yields a
    /// single guidance chunk without touching any backend. If no backend is
    /// active, one initialization of the configured default is attempted
    /// (on the blocking pool, since it may load a model). Panics inside the
    /// adapter surface as one final `Unexpected Error:` chunk.
    pub fn get_feedback(&self, text: &str, prompt: PromptKind) -> ChunkStream {
        let (min_chars, default_prompt) = {
            let inner = self.shared.inner.lock();
            (inner.config.min_autocomplete_chars, inner.config.system_prompt.clone())
        };

        if prompt.needs_min_length() && text.trim().chars().count() < min_chars {
            return single_chunk(AUTOCOMPLETE_TOO_SHORT_MESSAGE);
        }

        let manager = self.clone();
        let text = text.to_string();
        let system_prompt = prompt.system_prompt(&default_prompt).to_string();

        Box::pin(async_stream::stream! {
            let adapter = match manager.active_adapter() {
                Some(adapter) => Some(adapter),
                None => {
                    let retry = manager.clone();
                    let ok = tokio::task::spawn_blocking(move || retry.initialize(None))
                        .await
                        .unwrap_or(false);
                    if ok { manager.active_adapter() } else { None }
                }
            };

            let adapter = match adapter {
                Some(adapter) => adapter,
                None => {
                    yield INIT_FAILURE_MESSAGE.to_string();
                    return;
                }
            };

            let chunks = catch_unwind(AssertUnwindSafe(|| adapter.generate(&text, &system_prompt)));
            let chunks = match chunks {
                Ok(chunks) => chunks,
                Err(panic) => {
                    yield unexpected(&*panic);
                    return;
                }
            };

            let mut chunks = Box::pin(AssertUnwindSafe(chunks).catch_unwind());
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => yield chunk,
                    Err(panic) => {
                        yield unexpected(&*panic);
                        break;
                    }
                }
            }
        })
    }

    /// Drain [`get_feedback`](Self::get_feedback) into an ordered list.
    pub async fn get_feedback_as_list(&self, text: &str, prompt: PromptKind) -> Vec<String> {
        self.get_feedback(text, prompt).collect().await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn unexpected(panic: &(dyn Any + Send)) -> String {
    let message = panic_message(panic);
    tracing::error!(panic = %message, "Adapter panicked");
    error_chunk(ErrorCategory::Unexpected, &message)
}
