//! Message sequence builder.
//!
//! Packs a system prompt, few-shot examples, conversation history and the
//! current turn into a token budget. Mandatory parts (system, few-shots,
//! current turn) always go in. History is admitted newest first and stops
//! at the first turn that would overflow the budget, so what survives is
//! always a contiguous suffix of the conversation.
//!
//! # Output order
//!
//! ```text
//! [system, few-shot..., oldest kept turn, ..., newest kept turn, current turn]
//! ```

use serde::Serialize;
use sourcechat_core::error::ContextError;
use sourcechat_core::message::Message;
use tracing::{debug, info};

use crate::context::registry::ModelRegistry;
use crate::context::token::{TokenCounter, message_cost};

/// The assembled sequence plus its accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSequence {
    /// Messages in wire order.
    pub messages: Vec<Message>,
    /// Cost of `messages`, overhead included.
    pub total_tokens: usize,
    /// Budget the sequence was built against.
    pub budget: usize,
    /// Older turns left out because they did not fit.
    pub dropped_turns: usize,
    /// Older turns that made it in.
    pub history_turns: usize,
}

impl MessageSequence {
    /// True when the mandatory messages alone exceed the budget.
    pub fn over_budget(&self) -> bool {
        self.total_tokens > self.budget
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Builds message sequences for one model registry and token counter.
///
/// Stateless; `build` is a pure function of its inputs.
pub struct MessageSequenceBuilder<'a> {
    counter: &'a dyn TokenCounter,
    registry: &'a ModelRegistry,
}

impl<'a> MessageSequenceBuilder<'a> {
    pub fn new(counter: &'a dyn TokenCounter, registry: &'a ModelRegistry) -> Self {
        Self { counter, registry }
    }

    /// Assemble the sequence sent to the completion engine.
    ///
    /// `history` must be non-empty. Its last element is the turn being
    /// answered; it is replaced by `current_turn_content` (the turn text,
    /// usually with retrieved sources folded in) and never evicted.
    ///
    /// If the mandatory messages alone exceed `token_budget` the minimal
    /// sequence is still returned with [`MessageSequence::over_budget`]
    /// set. Callers decide how to surface that.
    pub fn build(
        &self,
        system_prompt: &str,
        model_id: &str,
        history: &[Message],
        current_turn_content: &str,
        token_budget: usize,
        few_shots: &[Message],
    ) -> Result<MessageSequence, ContextError> {
        let Some((_, older)) = history.split_last() else {
            return Err(ContextError::EmptyHistory);
        };
        if token_budget == 0 {
            return Err(ContextError::InvalidBudget);
        }

        let tokenizer = self.registry.canonical_tokenizer_for(model_id)?;

        let mut messages = Vec::with_capacity(few_shots.len() + history.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend(few_shots.iter().cloned());
        messages.push(Message::user(current_turn_content));
        let insert_at = few_shots.len() + 1;

        let mut total = 0;
        for message in &messages {
            total += message_cost(self.counter, message, tokenizer)?;
        }
        let mandatory = total;

        let mut admitted = 0;
        for candidate in older.iter().rev() {
            let cost = message_cost(self.counter, candidate, tokenizer)?;
            if total + cost > token_budget {
                info!(
                    model = model_id,
                    budget = token_budget,
                    dropped = older.len() - admitted,
                    "Reached max tokens, history will be truncated"
                );
                break;
            }
            messages.insert(insert_at, candidate.clone());
            total += cost;
            admitted += 1;
        }

        debug!(
            model = model_id,
            mandatory,
            total,
            budget = token_budget,
            history = admitted,
            "Assembled message sequence"
        );

        Ok(MessageSequence {
            messages,
            total_tokens: total,
            budget: token_budget,
            dropped_turns: older.len() - admitted,
            history_turns: admitted,
        })
    }
}
