//! Error types for the SourceChat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them so the pipeline can report any of them as a terminal record.

use thiserror::Error;

/// The top-level error type for all SourceChat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion engine ---
    #[error("Error generating chat completion: {0}")]
    Provider(#[from] ProviderError),

    // --- Search index ---
    #[error("Error searching documents: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Embedding service ---
    #[error("Error generating embedding: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Context assembly ---
    #[error("Context assembly failed: {0}")]
    Context(#[from] ContextError),

    // --- Prompt templates ---
    #[error("Prompt template error: {0}")]
    Template(#[from] TemplateError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration errors are fatal and must never be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::Template(_) | Self::Context(_)
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Search request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Search request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed search response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding service returned status {0}")]
    Status(u16),

    #[error("embedding request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Unknown model '{0}': no context limit registered")]
    UnknownModel(String),

    #[error("Unknown tokenizer '{0}': no encoding registered")]
    UnknownTokenizer(String),

    #[error(
        "Required messages need {required} tokens but the budget is {budget} \
         (system prompt, few-shots and current turn must fit)"
    )]
    BudgetExceeded { required: usize, budget: usize },

    #[error("History must contain at least the turn being answered")]
    EmptyHistory,

    #[error("Token budget must be positive")]
    InvalidBudget,

    #[error("Model '{model}': unknown sources placement '{value}'")]
    InvalidPlacement { model: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Template references unknown slot '{{{0}}}'")]
    UnknownSlot(String),

    #[error("Template slot '{{{0}}}' was referenced but not supplied")]
    MissingSlot(String),

    #[error("Unterminated slot starting at byte {0}")]
    Unterminated(usize),

    #[error("Unsupported response length {0} (expected 256, 1024 or 2048)")]
    UnsupportedResponseLength(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn embedding_error_prefix() {
        let err = Error::from(EmbeddingError::Status(503));
        assert_eq!(
            err.to_string(),
            "Error generating embedding: embedding service returned status 503"
        );
    }

    #[test]
    fn context_errors_are_configuration() {
        let err = Error::from(ContextError::UnknownModel("gpt-5-mini".into()));
        assert!(err.is_configuration());
        assert!(err.to_string().contains("gpt-5-mini"));
    }

    #[test]
    fn template_slot_rendering_keeps_braces() {
        let err = TemplateError::MissingSlot("user_title".into());
        assert_eq!(
            err.to_string(),
            "Template slot '{user_title}' was referenced but not supplied"
        );
    }
}
