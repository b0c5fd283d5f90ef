//! Configuration loading, validation, and management for SourceChat.
//!
//! Loads configuration from `~/.sourcechat/config.toml` with environment
//! variable overrides for secrets. Validates all settings at startup so a
//! bad value fails before the first request, not during one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.sourcechat/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion engine
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Document search index
    #[serde(default)]
    pub search: SearchConfig,

    /// Query embedding service
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Blob storage used to build source links
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-request chat defaults
    #[serde(default)]
    pub chat: ChatConfig,

    /// Extra model registry entries (merged over the built-in table)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelOverrideConfig>,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// ── Completion engine ─────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_api_version")]
    pub api_version: String,

    /// Deployment name sent on the wire
    #[serde(default = "default_model_name")]
    pub deployment: String,

    /// Model family behind the deployment; keys the model registry
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// `azure` (api-key header, deployment URL) or `bearer`
    /// (Authorization header, OpenAI-compatible URL)
    #[serde(default = "default_auth")]
    pub auth: String,

    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

fn default_openai_api_version() -> String {
    "2024-02-01".into()
}
fn default_model_name() -> String {
    "gpt-4o".into()
}
fn default_auth() -> String {
    "azure".into()
}
fn default_completion_timeout() -> u64 {
    120
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            api_version: default_openai_api_version(),
            deployment: default_model_name(),
            model_name: default_model_name(),
            auth: default_auth(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .field("model_name", &self.model_name)
            .field("auth", &self.auth)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Search index ──────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Service endpoint, e.g. `https://my-search.search.windows.net`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_index")]
    pub index: String,

    #[serde(default = "default_search_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub fields: SearchFieldsConfig,

    #[serde(default = "default_semantic_configuration")]
    pub semantic_configuration: String,

    /// Whether the index has a semantic ranker; requests may only ask for
    /// reranking when this is on.
    #[serde(default)]
    pub use_semantic_reranker: bool,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_index() -> String {
    "vector-index".into()
}
fn default_search_api_version() -> String {
    "2023-11-01".into()
}
fn default_semantic_configuration() -> String {
    "default".into()
}
fn default_search_timeout() -> u64 {
    60
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            index: default_index(),
            api_version: default_search_api_version(),
            fields: SearchFieldsConfig::default(),
            semantic_configuration: default_semantic_configuration(),
            use_semantic_reranker: false,
            timeout_secs: default_search_timeout(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("index", &self.index)
            .field("api_version", &self.api_version)
            .field("fields", &self.fields)
            .field("semantic_configuration", &self.semantic_configuration)
            .field("use_semantic_reranker", &self.use_semantic_reranker)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Index field names. The index schema itself is owned elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFieldsConfig {
    #[serde(default = "default_content_field")]
    pub content: String,
    #[serde(default = "default_source_file_field")]
    pub source_file: String,
    #[serde(default = "default_page_number_field")]
    pub page_number: String,
    #[serde(default = "default_file_name_field")]
    pub file_name: String,
    #[serde(default = "default_entity_field")]
    pub entity: String,
    #[serde(default = "default_vector_field")]
    pub vector: String,
}

fn default_content_field() -> String {
    "content".into()
}
fn default_source_file_field() -> String {
    "file_uri".into()
}
fn default_page_number_field() -> String {
    "pages".into()
}
fn default_file_name_field() -> String {
    "file_name".into()
}
fn default_entity_field() -> String {
    "entity".into()
}
fn default_vector_field() -> String {
    "contentVector".into()
}

impl Default for SearchFieldsConfig {
    fn default() -> Self {
        Self {
            content: default_content_field(),
            source_file: default_source_file_field(),
            page_number: default_page_number_field(),
            file_name: default_file_name_field(),
            entity: default_entity_field(),
            vector: default_vector_field(),
        }
    }
}

// ── Embedding service ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the enrichment service exposing `/models/{model}/embed`
    #[serde(default)]
    pub service_url: String,

    #[serde(default = "default_embedding_model")]
    pub target_model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".into()
}
fn default_embedding_timeout() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            target_model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

// ── Blob storage ──────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    /// Base64 account key used to sign access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_key: Option<String>,

    #[serde(default = "default_sas_lifetime")]
    pub sas_lifetime_minutes: i64,
}

fn default_sas_lifetime() -> i64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            account_name: None,
            account_key: None,
            sas_lifetime_minutes: default_sas_lifetime(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &redact(&self.account_key))
            .field("sas_lifetime_minutes", &self.sas_lifetime_minutes)
            .finish()
    }
}

// ── Chat defaults ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Passages requested per search call
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// 256, 1024 or 2048
    #[serde(default = "default_response_length")]
    pub response_length: u32,

    /// Override where retrieved sources go: `system_message` or
    /// `user_message`. Unset = the model's capability decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_placement: Option<String>,

    #[serde(default)]
    pub suggest_followup_questions: bool,

    #[serde(default = "default_true")]
    pub semantic_captions: bool,

    #[serde(default)]
    pub system_persona: String,

    #[serde(default)]
    pub user_persona: String,
}

fn default_top_k() -> usize {
    3
}
fn default_response_length() -> u32 {
    1024
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            response_length: default_response_length(),
            sources_placement: None,
            suggest_followup_questions: false,
            semantic_captions: true,
            system_persona: String::new(),
            user_persona: String::new(),
        }
    }
}

/// One extra model registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOverrideConfig {
    /// Exact model id (deployment model name)
    pub name: String,

    /// Context window in tokens
    pub context_limit: usize,

    /// Tokenizer family or encoding name; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,

    #[serde(default)]
    pub supports_seed: bool,

    #[serde(default = "default_model_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_user_placement")]
    pub sources_placement: String,

    /// Tokens held back from the history budget for the answer
    #[serde(default)]
    pub completion_reserve: usize,

    /// Whether to send the response length as `max_tokens`
    #[serde(default = "default_true")]
    pub passes_max_tokens: bool,
}

fn default_model_temperature() -> f32 {
    0.2
}
fn default_user_placement() -> String {
    "user_message".into()
}

const PLACEMENTS: &[&str] = &["system_message", "user_message"];
const RESPONSE_LENGTHS: &[u32] = &[256, 1024, 2048];

impl AppConfig {
    /// Load configuration from the default path (~/.sourcechat/config.toml).
    ///
    /// Also checks environment variables for secrets and the model:
    /// - `SOURCECHAT_OPENAI_KEY`, then `AZURE_OPENAI_API_KEY`
    /// - `SOURCECHAT_SEARCH_KEY`, then `AZURE_SEARCH_API_KEY`
    /// - `SOURCECHAT_STORAGE_KEY`
    /// - `SOURCECHAT_MODEL`, `SOURCECHAT_DEPLOYMENT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Secrets already present
    /// in the file win over the generic Azure variables but lose to the
    /// `SOURCECHAT_*` ones.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(key) = env("SOURCECHAT_OPENAI_KEY") {
            self.openai.api_key = Some(key);
        } else if self.openai.api_key.is_none() {
            self.openai.api_key = env("AZURE_OPENAI_API_KEY");
        }

        if let Some(key) = env("SOURCECHAT_SEARCH_KEY") {
            self.search.api_key = Some(key);
        } else if self.search.api_key.is_none() {
            self.search.api_key = env("AZURE_SEARCH_API_KEY");
        }

        if let Some(key) = env("SOURCECHAT_STORAGE_KEY") {
            self.storage.account_key = Some(key);
        }

        if let Some(model) = env("SOURCECHAT_MODEL") {
            self.openai.model_name = model;
        }

        if let Some(deployment) = env("SOURCECHAT_DEPLOYMENT") {
            self.openai.deployment = deployment;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sourcechat")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.openai.auth.as_str(), "azure" | "bearer") {
            return Err(ConfigError::ValidationError(format!(
                "openai.auth must be \"azure\" or \"bearer\", got \"{}\"",
                self.openai.auth
            )));
        }

        if self.openai.timeout_secs == 0
            || self.search.timeout_secs == 0
            || self.embedding.timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be at least one second".into(),
            ));
        }

        if self.chat.top_k == 0 {
            return Err(ConfigError::ValidationError("chat.top_k must be > 0".into()));
        }

        if !RESPONSE_LENGTHS.contains(&self.chat.response_length) {
            return Err(ConfigError::ValidationError(format!(
                "chat.response_length must be one of {:?}, got {}",
                RESPONSE_LENGTHS, self.chat.response_length
            )));
        }

        if let Some(placement) = &self.chat.sources_placement {
            if !PLACEMENTS.contains(&placement.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "chat.sources_placement must be one of {PLACEMENTS:?}, got \"{placement}\""
                )));
            }
        }

        if self.storage.sas_lifetime_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "storage.sas_lifetime_minutes must be > 0".into(),
            ));
        }

        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "models[].name must not be empty".into(),
                ));
            }
            if model.context_limit == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "models[{}].context_limit must be > 0",
                    model.name
                )));
            }
            if model.completion_reserve >= model.context_limit {
                return Err(ConfigError::ValidationError(format!(
                    "models[{}].completion_reserve must be smaller than context_limit",
                    model.name
                )));
            }
            if !PLACEMENTS.contains(&model.sources_placement.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "models[{}].sources_placement must be one of {PLACEMENTS:?}",
                    model.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
