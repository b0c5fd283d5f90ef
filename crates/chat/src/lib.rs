//! Retrieval-augmented chat for SourceChat.
//!
//! A request flows through:
//!
//! 1. **Embed** the user's question
//! 2. **Search** the document index (one search, or one per compared entity)
//! 3. **Format** passages into a moniker-tagged context block with citations
//! 4. **Pack** system prompt, few-shots, history and the current turn into
//!    the model's token budget, dropping the oldest turns first
//! 5. **Stream** the completion back as newline-delimited JSON records
//!
//! Collaborators are injected as trait objects (see `sourcechat-core`), so
//! the whole flow runs against the fakes in `test_helpers` in tests.

pub mod context;
pub mod filter;
pub mod pipeline;
pub mod prompts;
pub mod request;
pub mod stream_event;
#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use context::{
    Citation, CitationLookup, ContextBlock, MessageSequence, MessageSequenceBuilder,
    ModelCapabilities, ModelRegistry, ModelSpec, PassageGroup, PromptTemplate, RetrievedPassage,
    Slot, SlotValues, SourcesPlacement, TiktokenCounter, TokenCounter,
};
pub use filter::SearchFilter;
pub use pipeline::{ChatPipeline, PipelineConfig};
pub use prompts::{PromptOverride, ResponseLength};
pub use request::{ChatOptions, ChatRequest, UserProfile};
pub use stream_event::{ChatRecord, UsageReport};
