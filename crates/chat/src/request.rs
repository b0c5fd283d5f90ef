//! Inbound chat request shape.

use serde::{Deserialize, Serialize};
use sourcechat_core::message::Message;

/// One chat request: the conversation so far plus scoping and options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation, oldest first. The last message is the turn to answer.
    pub messages: Vec<Message>,

    /// Entities to compare (comparison mode only), in display order.
    #[serde(default)]
    pub selected_entities: Vec<String>,

    #[serde(default)]
    pub selected_years: Vec<String>,

    #[serde(default)]
    pub document_types: Vec<String>,

    /// Run one search per selected entity and answer side by side.
    #[serde(default)]
    pub entity_comparison: bool,

    #[serde(default)]
    pub user: UserProfile,

    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    /// Text of the turn being answered.
    pub fn query(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}

/// Who is asking. Feeds the prompt and scopes single-entity search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Organisation whose documents a normal request searches.
    #[serde(default)]
    pub legal_entity: String,
    #[serde(default)]
    pub industry: String,
    /// How the assistant addresses the user, e.g. "financial analysts".
    #[serde(default)]
    pub title: String,
}

/// Per-request overrides. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Ask for semantic reranking (honoured only if the index has it).
    #[serde(default)]
    pub semantic_ranker: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_captions: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest_followup_questions: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_persona: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_persona: Option<String>,

    /// `>>>text` injects into the built-in prompt; any other non-default
    /// value replaces it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Prepend the response few-shot examples.
    #[serde(default)]
    pub include_few_shots: bool,
}
