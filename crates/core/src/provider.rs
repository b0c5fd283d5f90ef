//! Completion client trait: the abstraction over chat-completion backends.
//!
//! A completion client takes an assembled message sequence and streams the
//! generated answer back as incremental text fragments.
//!
//! Implementations: Azure OpenAI deployments and OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Sampling parameters for a single completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Fixed seed, for backends that honor one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            seed: None,
        }
    }
}

/// A streaming chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Deployment (Azure) or model (OpenAI-compatible) to call
    pub deployment: String,

    /// The assembled message sequence
    pub messages: Vec<Message>,

    /// Sampling parameters
    #[serde(default)]
    pub sampling: SamplingParams,
}

/// Token usage information reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receiving half of a completion stream.
///
/// Dropping it cancels the stream: the producer notices the closed channel
/// on its next send and releases the underlying connection.
pub type CompletionStream = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The completion client trait.
///
/// The pipeline calls `stream_chat()` without knowing which backend is
/// behind it, so tests can substitute a scripted client.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for this client (e.g., "azure-openai").
    fn name(&self) -> &str;

    /// Open a streaming completion.
    ///
    /// Errors returned here happen before any fragment is produced;
    /// errors after that arrive as `Err` items on the stream.
    async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
    ) -> std::result::Result<CompletionStream, ProviderError>;
}
