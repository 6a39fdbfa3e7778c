//! Runtime configuration.
//!
//! A [`Config`] is built once at startup from three layers, later layers
//! winning: built-in defaults, an optional YAML file, then environment
//! variables (after loading `.env`). It is passed explicitly to the
//! [`BackendManager`](crate::BackendManager) and the conversation clients;
//! nothing in this crate reads the environment after construction.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use quill_core::prompts::DEFAULT_SYSTEM_PROMPT;
use quill_core::settings::HostedSettings;
use quill_core::{Backend, ConfigError, FileSettings, ModelParams};

use crate::providers::{ApiCredential, CredentialSource, GROQ_BASE_URL, OPENAI_BASE_URL};

/// Backend selection variable.
pub const BACKEND_ENV: &str = "BACKEND_TYPE";
/// Config file path variable.
pub const CONFIG_PATH_ENV: &str = "QUILL_CONFIG";
/// Local GGUF model path variable.
pub const LOCAL_MODEL_PATH_ENV: &str = "QUILL_LOCAL_MODEL_PATH";
/// Request timeout variable (humantime, e.g. "45s").
pub const REQUEST_TIMEOUT_ENV: &str = "QUILL_REQUEST_TIMEOUT";
/// Sugar-AI API key variable.
pub const SUGAR_AI_API_KEY_ENV: &str = "SUGAR_AI_API_KEY";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_GROQ_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_LOCAL_MODEL_NAME: &str = "Qwen/Qwen2-0.5B-Instruct-GGUF";
pub const DEFAULT_LOCAL_MODEL_FILE: &str = "qwen2-0_5b-instruct-q4_k_m.gguf";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_SUGAR_AI_URL: &str = "https://ai.sugarlabs.org";
pub const DEFAULT_SUGAR_AI_FALLBACK_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MIN_AUTOCOMPLETE_CHARS: usize = 20;

/// Local model settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalConfig {
    /// GGUF file to load; overrides `model_name`/`model_file`
    pub model_path: Option<PathBuf>,

    /// Hugging Face repository the model is fetched from when no path is set
    pub model_name: String,

    /// GGUF file within `model_name`
    pub model_file: String,

    /// Context window in tokens
    pub context_size: u32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_name: DEFAULT_LOCAL_MODEL_NAME.to_string(),
            model_file: DEFAULT_LOCAL_MODEL_FILE.to_string(),
            context_size: 2048,
        }
    }
}

impl LocalConfig {
    /// Key under which the loaded model is shared process-wide.
    pub fn model_id(&self) -> String {
        match &self.model_path {
            Some(path) => path.display().to_string(),
            None => format!("{}/{}", self.model_name, self.model_file),
        }
    }
}

/// Settings for one hosted OpenAI-compatible backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostedConfig {
    pub model: String,
    pub base_url: String,
}

impl HostedConfig {
    fn new(model: &str, base_url: &str) -> Self {
        Self {
            model: model.to_string(),
            base_url: base_url.to_string(),
        }
    }

    fn apply(&mut self, settings: &HostedSettings) {
        if let Some(model) = &settings.model {
            self.model = model.clone();
        }
        if let Some(url) = &settings.base_url {
            self.base_url = url.clone();
        }
    }
}

/// Which service answers conversation turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatClientKind {
    #[default]
    Groq,
    SugarAi,
}

impl FromStr for ChatClientKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(ChatClientKind::Groq),
            "sugar-ai" | "sugar_ai" | "sugarai" => Ok(ChatClientKind::SugarAi),
            other => Err(ConfigError::InvalidSetting {
                name: "chat.client",
                reason: format!("unknown chat client '{}'", other),
            }),
        }
    }
}

/// Conversation client settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatConfig {
    pub client: ChatClientKind,
    pub model: String,
    pub sugar_ai_url: String,
    pub sugar_ai_fallback_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            client: ChatClientKind::default(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            sugar_ai_url: DEFAULT_SUGAR_AI_URL.to_string(),
            sugar_ai_fallback_url: DEFAULT_SUGAR_AI_FALLBACK_URL.to_string(),
        }
    }
}

/// Effective configuration.
///
/// Credentials are never serialized; `quill config` prints the rest.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Backend used when `initialize` is called without one
    pub backend: Backend,

    /// System prompt for plain feedback requests
    pub system_prompt: String,

    pub model_params: ModelParams,

    #[serde(serialize_with = "serialize_duration")]
    pub request_timeout: Duration,

    /// Minimum trimmed length for autocomplete input
    pub min_autocomplete_chars: usize,

    pub local: LocalConfig,
    pub openai: HostedConfig,
    pub groq: HostedConfig,
    pub chat: ChatConfig,

    #[serde(skip)]
    credentials: BTreeMap<Backend, ApiCredential>,

    #[serde(skip)]
    sugar_ai_credential: Option<ApiCredential>,
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model_params: ModelParams::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_autocomplete_chars: DEFAULT_MIN_AUTOCOMPLETE_CHARS,
            local: LocalConfig::default(),
            openai: HostedConfig::new(DEFAULT_OPENAI_MODEL, OPENAI_BASE_URL),
            groq: HostedConfig::new(DEFAULT_GROQ_MODEL, GROQ_BASE_URL),
            chat: ChatConfig::default(),
            credentials: BTreeMap::new(),
            sugar_ai_credential: None,
        }
    }
}

impl Config {
    /// Build from the process environment.
    ///
    /// Loads `.env` if present, then the file named by `path` (or by
    /// `QUILL_CONFIG`), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(env_path) => tracing::debug!(path = %env_path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env"),
        }

        let file_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let file = match file_path {
            Some(p) => FileSettings::from_yaml_file(&p)?,
            None => FileSettings::default(),
        };

        Self::from_lookup(file, |key| std::env::var(key).ok())
    }

    /// Build from the environment without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Build from parsed file settings and an environment lookup.
    ///
    /// Sampling parameters are bounds-checked here; credentials are not
    /// required until [`validate`](Config::validate).
    pub fn from_lookup<F>(file: FileSettings, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_file(&file)?;

        if let Some(raw) = non_blank(lookup(BACKEND_ENV)) {
            config.backend = raw.parse()?;
        }
        if let Some(path) = non_blank(lookup(LOCAL_MODEL_PATH_ENV)) {
            config.local.model_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_blank(lookup(REQUEST_TIMEOUT_ENV)) {
            config.request_timeout = parse_timeout(&raw)?;
        }

        for backend in Backend::ALL {
            if let Some(env_var) = backend.credential_env() {
                if let Some(cred) = ApiCredential::lookup(env_var, credential_name(backend), &lookup)
                {
                    config.credentials.insert(backend, cred);
                }
            }
        }
        config.sugar_ai_credential =
            ApiCredential::lookup(SUGAR_AI_API_KEY_ENV, "Sugar-AI API key", &lookup);

        config.model_params.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: &FileSettings) -> Result<(), ConfigError> {
        if let Some(raw) = &file.backend {
            self.backend = raw.parse()?;
        }
        if let Some(prompt) = &file.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(raw) = &file.request_timeout {
            self.request_timeout = parse_timeout(raw)?;
        }
        if let Some(min) = file.min_autocomplete_chars {
            self.min_autocomplete_chars = min;
        }

        let params = &file.model_params;
        if let Some(v) = params.max_new_tokens {
            self.model_params.max_new_tokens = v;
        }
        if let Some(v) = params.temperature {
            self.model_params.temperature = v;
        }
        if let Some(v) = params.top_p {
            self.model_params.top_p = v;
        }

        if let Some(path) = &file.local.model_path {
            self.local.model_path = Some(PathBuf::from(path));
        }
        if let Some(name) = &file.local.model_name {
            self.local.model_name = name.clone();
        }
        if let Some(model_file) = &file.local.model_file {
            self.local.model_file = model_file.clone();
        }
        if let Some(size) = file.local.context_size {
            self.local.context_size = size;
        }

        self.openai.apply(&file.openai);
        self.groq.apply(&file.groq);

        if let Some(client) = &file.chat.client {
            self.chat.client = client.parse()?;
        }
        if let Some(model) = &file.chat.model {
            self.chat.model = model.clone();
        }
        if let Some(url) = &file.chat.sugar_ai_url {
            self.chat.sugar_ai_url = url.clone();
        }
        if let Some(url) = &file.chat.sugar_ai_fallback_url {
            self.chat.sugar_ai_fallback_url = url.clone();
        }
        Ok(())
    }

    /// Credential for `backend`, if one was found. Absence is not an error.
    pub fn get_credential(&self, backend: Backend) -> Option<&ApiCredential> {
        self.credentials.get(&backend)
    }

    pub fn sugar_ai_credential(&self) -> Option<&ApiCredential> {
        self.sugar_ai_credential.as_ref()
    }

    /// Set a credential programmatically. Ignored for credential-free backends.
    pub fn with_credential(mut self, backend: Backend, value: impl Into<String>) -> Self {
        if backend.requires_credential() {
            self.credentials.insert(
                backend,
                ApiCredential::new(value, CredentialSource::Programmatic, credential_name(backend)),
            );
        }
        self
    }

    pub fn with_sugar_ai_credential(mut self, value: impl Into<String>) -> Self {
        self.sugar_ai_credential = Some(ApiCredential::new(
            value,
            CredentialSource::Programmatic,
            "Sugar-AI API key",
        ));
        self
    }

    /// Validate the selected backend and shared settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_for(self.backend)
    }

    /// Validate as if `backend` were selected.
    pub fn validate_for(&self, backend: Backend) -> Result<(), ConfigError> {
        self.model_params.validate()?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                name: "request_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(env_var) = backend.credential_env() {
            if self.get_credential(backend).is_none() {
                return Err(ConfigError::MissingCredential { backend, env_var });
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Switch the default backend. Rejected changes leave the config as it was.
    pub fn set_backend(&mut self, backend: Backend) -> Result<(), ConfigError> {
        self.validate_for(backend)?;
        self.backend = backend;
        Ok(())
    }

    /// Settings for a hosted backend; `None` for local.
    pub fn hosted(&self, backend: Backend) -> Option<&HostedConfig> {
        match backend {
            Backend::Local => None,
            Backend::OpenAi => Some(&self.openai),
            Backend::Groq => Some(&self.groq),
        }
    }
}

fn credential_name(backend: Backend) -> &'static str {
    match backend {
        Backend::Local => "Local model",
        Backend::OpenAi => "OpenAI API key",
        Backend::Groq => "Groq API key",
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidSetting {
        name: "request_timeout",
        reason: format!("'{}': {}", raw, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(env: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(FileSettings::default(), |k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.model_params, ModelParams::default());
        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.groq.base_url, GROQ_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.min_autocomplete_chars, 20);
    }

    #[test]
    fn test_local_validates_without_credentials() {
        let config = config_with(&[]).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.get_credential(Backend::Local).is_none());
    }

    #[test]
    fn test_hosted_backends_need_credentials() {
        for backend in [Backend::OpenAi, Backend::Groq] {
            let config = config_with(&[]).unwrap();
            assert_eq!(
                config.validate_for(backend),
                Err(ConfigError::MissingCredential {
                    backend,
                    env_var: backend.credential_env().unwrap()
                })
            );

            let config = config.with_credential(backend, "key");
            assert!(config.validate_for(backend).is_ok());
        }
    }

    #[test]
    fn test_env_selects_backend_and_reads_key() {
        let config = config_with(&[("BACKEND_TYPE", "llama"), ("GROQ_API_KEY", "gsk_abc")]).unwrap();
        assert_eq!(config.backend, Backend::Groq);
        assert_eq!(config.get_credential(Backend::Groq).unwrap().expose(), "gsk_abc");
        assert!(config.is_valid());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = config_with(&[("BACKEND_TYPE", "mistral")]).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedBackend("mistral".to_string()));
    }

    #[test]
    fn test_blank_key_is_absent() {
        let config = config_with(&[("OPENAI_API_KEY", "   ")]).unwrap();
        assert!(config.get_credential(Backend::OpenAi).is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileSettings::from_yaml(
            "backend: openai\nrequest_timeout: 10s\nmodel_params:\n  temperature: 0.7\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([("BACKEND_TYPE", "groq"), ("QUILL_REQUEST_TIMEOUT", "1m")]);
        let config = Config::from_lookup(file, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.backend, Backend::Groq);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.model_params.temperature, 0.7);
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = config_with(&[("QUILL_REQUEST_TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { name: "request_timeout", .. }));
    }

    #[test]
    fn test_set_backend_revalidates() {
        let mut config = config_with(&[]).unwrap();
        assert!(config.set_backend(Backend::OpenAi).is_err());
        assert_eq!(config.backend, Backend::Local);

        let mut config = config.with_credential(Backend::OpenAi, "sk-test");
        config.set_backend(Backend::OpenAi).unwrap();
        assert_eq!(config.backend, Backend::OpenAi);
    }

    #[test]
    fn test_local_credential_ignored() {
        let config = Config::default().with_credential(Backend::Local, "x");
        assert!(config.get_credential(Backend::Local).is_none());
    }

    #[test]
    fn test_chat_client_parse() {
        assert_eq!("sugar-ai".parse::<ChatClientKind>().unwrap(), ChatClientKind::SugarAi);
        assert_eq!("Groq".parse::<ChatClientKind>().unwrap(), ChatClientKind::Groq);
        assert!("ollama".parse::<ChatClientKind>().is_err());
    }

    #[test]
    fn test_serialized_config_has_no_secrets() {
        let config = Config::default().with_credential(Backend::OpenAi, "sk-verysecretvalue");
        let yaml = serde_json::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-verysecretvalue"));
        assert!(yaml.contains("\"request_timeout\":\"30s\""));
        assert!(yaml.contains("\"client\":\"groq\""));
    }

    #[test]
    fn test_model_id_prefers_path() {
        let mut local = LocalConfig::default();
        assert_eq!(
            local.model_id(),
            format!("{}/{}", DEFAULT_LOCAL_MODEL_NAME, DEFAULT_LOCAL_MODEL_FILE)
        );
        local.model_path = Some(PathBuf::from("/models/q.gguf"));
        assert_eq!(local.model_id(), "/models/q.gguf");
    }
}
