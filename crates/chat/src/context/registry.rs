//! Model registry: context limits, tokenizer families and per-model
//! capabilities, looked up by exact model id.
//!
//! The registry is built once at startup and never mutated afterwards, so
//! it can be shared across concurrent requests behind an `Arc` without
//! locking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sourcechat_config::ModelOverrideConfig;
use sourcechat_core::error::ContextError;

/// Where retrieved sources are placed in the message sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcesPlacement {
    /// Appended to the system prompt.
    SystemMessage,
    /// Appended to the final user turn.
    UserMessage,
}

impl SourcesPlacement {
    /// Parse the configuration spelling (`system_message` / `user_message`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system_message" => Some(Self::SystemMessage),
            "user_message" => Some(Self::UserMessage),
            _ => None,
        }
    }
}

/// Behaviour switches for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Whether the completion API honours a fixed `seed`.
    pub supports_seed: bool,
    /// Temperature used when the request does not set one.
    pub default_temperature: f32,
    /// Where retrieved sources go.
    pub sources_placement: SourcesPlacement,
    /// Tokens held back from the history budget for the answer.
    pub completion_reserve: usize,
    /// Whether the response length is sent as `max_tokens`.
    pub passes_max_tokens: bool,
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub context_limit: usize,
    pub tokenizer: String,
    pub capabilities: ModelCapabilities,
}

impl ModelSpec {
    /// Budget for the assembled prompt: context limit minus the reserve.
    pub fn prompt_budget(&self) -> usize {
        self.context_limit
            .saturating_sub(self.capabilities.completion_reserve)
    }
}

const GPT35: ModelCapabilities = ModelCapabilities {
    supports_seed: false,
    default_temperature: 0.6,
    sources_placement: SourcesPlacement::UserMessage,
    completion_reserve: 500,
    passes_max_tokens: false,
};

const GPT4: ModelCapabilities = ModelCapabilities {
    supports_seed: true,
    default_temperature: 0.2,
    sources_placement: SourcesPlacement::UserMessage,
    completion_reserve: 0,
    passes_max_tokens: true,
};

/// (id, context limit, tokenizer family, capabilities)
const BUILTIN: &[(&str, usize, &str, ModelCapabilities)] = &[
    ("gpt-35-turbo", 4097, "gpt-3.5-turbo", GPT35),
    ("gpt-3.5-turbo", 4097, "gpt-3.5-turbo", GPT35),
    ("gpt-35-turbo-16k", 16385, "gpt-3.5-turbo-16k", GPT35),
    ("gpt-3.5-turbo-16k", 16385, "gpt-3.5-turbo-16k", GPT35),
    ("gpt-4", 8192, "gpt-4", GPT4),
    ("gpt-4-32k", 32768, "gpt-4-32k", GPT4),
    ("gpt-4o", 128000, "gpt-4o", GPT4),
];

/// Read-only table of known models.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// The built-in table of Azure OpenAI deployments and their OpenAI names.
    pub fn builtin() -> Self {
        let models = BUILTIN
            .iter()
            .map(|(id, limit, tokenizer, caps)| {
                (
                    id.to_string(),
                    ModelSpec {
                        id: id.to_string(),
                        context_limit: *limit,
                        tokenizer: tokenizer.to_string(),
                        capabilities: *caps,
                    },
                )
            })
            .collect();
        Self { models }
    }

    /// A new registry with configured entries merged over this one.
    ///
    /// Entries with an existing id replace the built-in row. An entry whose
    /// `sources_placement` is not a known spelling is rejected.
    pub fn with_overrides(&self, overrides: &[ModelOverrideConfig]) -> Result<Self, ContextError> {
        let mut models = self.models.clone();
        for o in overrides {
            let sources_placement = SourcesPlacement::parse(&o.sources_placement).ok_or_else(|| {
                ContextError::InvalidPlacement {
                    model: o.name.clone(),
                    value: o.sources_placement.clone(),
                }
            })?;
            let spec = ModelSpec {
                id: o.name.clone(),
                context_limit: o.context_limit,
                tokenizer: o.tokenizer.clone().unwrap_or_else(|| o.name.clone()),
                capabilities: ModelCapabilities {
                    supports_seed: o.supports_seed,
                    default_temperature: o.default_temperature,
                    sources_placement,
                    completion_reserve: o.completion_reserve,
                    passes_max_tokens: o.passes_max_tokens,
                },
            };
            tracing::debug!(model = %spec.id, limit = spec.context_limit, "Registered model override");
            models.insert(spec.id.clone(), spec);
        }
        Ok(Self { models })
    }

    /// Full entry for a model id.
    pub fn spec(&self, model_id: &str) -> Result<&ModelSpec, ContextError> {
        self.models
            .get(model_id)
            .ok_or_else(|| ContextError::UnknownModel(model_id.to_string()))
    }

    /// Context window size in tokens.
    pub fn limit_for(&self, model_id: &str) -> Result<usize, ContextError> {
        Ok(self.spec(model_id)?.context_limit)
    }

    /// Tokenizer family used to count tokens for this model.
    pub fn canonical_tokenizer_for(&self, model_id: &str) -> Result<&str, ContextError> {
        Ok(self.spec(model_id)?.tokenizer.as_str())
    }

    pub fn capabilities_for(&self, model_id: &str) -> Result<ModelCapabilities, ContextError> {
        Ok(self.spec(model_id)?.capabilities)
    }

    /// All entries, sorted by id.
    pub fn list(&self) -> Vec<&ModelSpec> {
        let mut specs: Vec<&ModelSpec> = self.models.values().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_limits() {
        let reg = ModelRegistry::builtin();
        assert_eq!(reg.limit_for("gpt-35-turbo").unwrap(), 4097);
        assert_eq!(reg.limit_for("gpt-3.5-turbo-16k").unwrap(), 16385);
        assert_eq!(reg.limit_for("gpt-4").unwrap(), 8192);
        assert_eq!(reg.limit_for("gpt-4-32k").unwrap(), 32768);
        assert_eq!(reg.limit_for("gpt-4o").unwrap(), 128000);
    }

    #[test]
    fn unknown_model_fails() {
        let reg = ModelRegistry::builtin();
        assert_eq!(
            reg.limit_for("gpt-5-mega").unwrap_err(),
            ContextError::UnknownModel("gpt-5-mega".into())
        );
        assert!(reg.canonical_tokenizer_for("gpt-5-mega").is_err());
        assert!(reg.capabilities_for("gpt-5-mega").is_err());
    }

    #[test]
    fn lookup_is_exact_not_prefix() {
        let reg = ModelRegistry::builtin();
        assert!(reg.limit_for("gpt-4o-mini").is_err());
        assert!(reg.limit_for("gpt-4-turbo").is_err());
    }

    #[test]
    fn deployment_aliases_map_to_tokenizer_family() {
        let reg = ModelRegistry::builtin();
        assert_eq!(reg.canonical_tokenizer_for("gpt-35-turbo").unwrap(), "gpt-3.5-turbo");
        assert_eq!(
            reg.canonical_tokenizer_for("gpt-35-turbo-16k").unwrap(),
            "gpt-3.5-turbo-16k"
        );
        assert_eq!(reg.canonical_tokenizer_for("gpt-4o").unwrap(), "gpt-4o");
        assert_eq!(reg.canonical_tokenizer_for("gpt-4").unwrap(), "gpt-4");
    }

    #[test]
    fn capabilities_by_family() {
        let reg = ModelRegistry::builtin();
        let gpt35 = reg.capabilities_for("gpt-35-turbo").unwrap();
        assert!(!gpt35.supports_seed);
        assert!(!gpt35.passes_max_tokens);
        assert_eq!(gpt35.completion_reserve, 500);
        assert!((gpt35.default_temperature - 0.6).abs() < f32::EPSILON);

        let gpt4o = reg.capabilities_for("gpt-4o").unwrap();
        assert!(gpt4o.supports_seed);
        assert!(gpt4o.passes_max_tokens);
        assert_eq!(gpt4o.sources_placement, SourcesPlacement::UserMessage);
    }

    #[test]
    fn prompt_budget_subtracts_reserve() {
        let reg = ModelRegistry::builtin();
        assert_eq!(reg.spec("gpt-35-turbo").unwrap().prompt_budget(), 3597);
        assert_eq!(reg.spec("gpt-4").unwrap().prompt_budget(), 8192);
    }

    #[test]
    fn overrides_add_and_replace() {
        let base = ModelRegistry::builtin();
        let reg = base.with_overrides(&[
            ModelOverrideConfig {
                name: "gpt-4-turbo".into(),
                context_limit: 128000,
                tokenizer: Some("cl100k_base".into()),
                supports_seed: true,
                default_temperature: 0.1,
                sources_placement: "system_message".into(),
                completion_reserve: 4096,
                passes_max_tokens: true,
            },
            ModelOverrideConfig {
                name: "gpt-4".into(),
                context_limit: 4000,
                tokenizer: None,
                supports_seed: false,
                default_temperature: 0.3,
                sources_placement: "user_message".into(),
                completion_reserve: 0,
                passes_max_tokens: false,
            },
        ])
        .unwrap();

        let turbo = reg.spec("gpt-4-turbo").unwrap();
        assert_eq!(turbo.tokenizer, "cl100k_base");
        assert_eq!(turbo.capabilities.sources_placement, SourcesPlacement::SystemMessage);
        assert_eq!(reg.limit_for("gpt-4").unwrap(), 4000);
        assert_eq!(reg.canonical_tokenizer_for("gpt-4").unwrap(), "gpt-4");

        // The original registry is untouched.
        assert_eq!(base.limit_for("gpt-4").unwrap(), 8192);
        assert!(base.limit_for("gpt-4-turbo").is_err());
    }

    #[test]
    fn misspelled_placement_is_rejected() {
        let err = ModelRegistry::builtin()
            .with_overrides(&[ModelOverrideConfig {
                name: "gpt-4-turbo".into(),
                context_limit: 128000,
                tokenizer: None,
                supports_seed: true,
                default_temperature: 0.0,
                sources_placement: "system".into(),
                completion_reserve: 0,
                passes_max_tokens: true,
            }])
            .unwrap_err();
        assert_eq!(
            err,
            ContextError::InvalidPlacement {
                model: "gpt-4-turbo".into(),
                value: "system".into(),
            }
        );
    }

    #[test]
    fn list_is_sorted() {
        let reg = ModelRegistry::builtin();
        let ids: Vec<&str> = reg.list().iter().map(|s| s.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 7);
    }

    #[test]
    fn placement_parse() {
        assert_eq!(
            SourcesPlacement::parse("system_message"),
            Some(SourcesPlacement::SystemMessage)
        );
        assert_eq!(SourcesPlacement::parse("footer"), None);
    }
}
