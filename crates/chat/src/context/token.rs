//! Token counting.
//!
//! Counts are exact BPE counts from `tiktoken-rs`, resolved per tokenizer
//! id. A tokenizer id is either an encoding name (`cl100k_base`,
//! `o200k_base`, ...) or an OpenAI model name (`gpt-4`, `gpt-3.5-turbo`).
//! Compiled encoders are cached for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use sourcechat_core::error::ContextError;
use sourcechat_core::message::Message;
use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};

/// Per-message structural overhead: one token each for the `role` and
/// `content` keys, plus the role name itself (every role is one token).
pub const MESSAGE_OVERHEAD: usize = 3;

/// Counts tokens for a tokenizer id.
///
/// Implementations must be deterministic: the same text and id always
/// yield the same count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, tokenizer_id: &str) -> Result<usize, ContextError>;
}

/// Cost of one message as it will be framed on the wire.
pub fn message_cost(
    counter: &dyn TokenCounter,
    message: &Message,
    tokenizer_id: &str,
) -> Result<usize, ContextError> {
    Ok(counter.count(&message.content, tokenizer_id)? + MESSAGE_OVERHEAD)
}

/// Cost of a slice of messages.
pub fn messages_cost(
    counter: &dyn TokenCounter,
    messages: &[Message],
    tokenizer_id: &str,
) -> Result<usize, ContextError> {
    messages
        .iter()
        .map(|m| message_cost(counter, m, tokenizer_id))
        .sum()
}

static ENCODERS: LazyLock<RwLock<HashMap<&'static str, Arc<CoreBPE>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The production counter, backed by `tiktoken-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenCounter;

impl TiktokenCounter {
    pub fn new() -> Self {
        Self
    }

    fn resolve(tokenizer_id: &str) -> Option<Tokenizer> {
        match tokenizer_id {
            "o200k_base" => Some(Tokenizer::O200kBase),
            "cl100k_base" => Some(Tokenizer::Cl100kBase),
            "p50k_base" => Some(Tokenizer::P50kBase),
            "r50k_base" => Some(Tokenizer::R50kBase),
            model => get_tokenizer(model),
        }
    }

    fn encoding_name(tokenizer: Tokenizer) -> &'static str {
        match tokenizer {
            Tokenizer::O200kBase => "o200k_base",
            Tokenizer::Cl100kBase => "cl100k_base",
            Tokenizer::P50kBase => "p50k_base",
            Tokenizer::R50kBase => "r50k_base",
            Tokenizer::P50kEdit => "p50k_edit",
            Tokenizer::Gpt2 => "gpt2",
        }
    }

    fn encoder(tokenizer_id: &str) -> Result<Arc<CoreBPE>, ContextError> {
        let tokenizer = Self::resolve(tokenizer_id)
            .ok_or_else(|| ContextError::UnknownTokenizer(tokenizer_id.to_string()))?;
        let name = Self::encoding_name(tokenizer);

        if let Some(bpe) = ENCODERS.read().ok().and_then(|m| m.get(name).cloned()) {
            return Ok(bpe);
        }

        let bpe = Arc::new(
            tiktoken_rs::get_bpe_from_tokenizer(tokenizer)
                .map_err(|_| ContextError::UnknownTokenizer(tokenizer_id.to_string()))?,
        );
        tracing::debug!(encoding = name, "Loaded tokenizer encoding");

        if let Ok(mut map) = ENCODERS.write() {
            map.entry(name).or_insert_with(|| bpe.clone());
        }
        Ok(bpe)
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str, tokenizer_id: &str) -> Result<usize, ContextError> {
        let bpe = Self::encoder(tokenizer_id)?;
        if text.is_empty() {
            return Ok(0);
        }
        Ok(bpe.encode_ordinary(text).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(TiktokenCounter.count("", "gpt-4").unwrap(), 0);
    }

    #[test]
    fn known_cl100k_count() {
        // "hello world" is two tokens in cl100k_base
        assert_eq!(TiktokenCounter.count("hello world", "cl100k_base").unwrap(), 2);
        assert_eq!(TiktokenCounter.count("hello world", "gpt-4").unwrap(), 2);
    }

    #[test]
    fn model_names_resolve() {
        for id in ["gpt-3.5-turbo", "gpt-3.5-turbo-16k", "gpt-4-32k", "gpt-4o"] {
            assert!(TiktokenCounter.count("some text", id).is_ok(), "{id}");
        }
    }

    #[test]
    fn unknown_tokenizer_fails() {
        let err = TiktokenCounter.count("text", "llama-3").unwrap_err();
        assert_eq!(err, ContextError::UnknownTokenizer("llama-3".into()));
    }

    #[test]
    fn unknown_tokenizer_fails_on_empty_text() {
        let err = TiktokenCounter.count("", "llama-3").unwrap_err();
        assert_eq!(err, ContextError::UnknownTokenizer("llama-3".into()));
        assert_eq!(TiktokenCounter.count("", "gpt-4o").unwrap(), 0);
    }

    #[test]
    fn counting_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let a = TiktokenCounter.count(text, "gpt-4o").unwrap();
        let b = TiktokenCounter.count(text, "gpt-4o").unwrap();
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("hello world");
        assert_eq!(message_cost(&TiktokenCounter, &msg, "gpt-4").unwrap(), 5);
    }

    #[test]
    fn messages_cost_sums() {
        let msgs = vec![Message::user("hello world"), Message::assistant("")];
        assert_eq!(messages_cost(&TiktokenCounter, &msgs, "gpt-4").unwrap(), 8);
    }
}
