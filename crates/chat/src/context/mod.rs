//! Conversation-context assembly.
//!
//! | Piece | Module |
//! |-------|--------|
//! | Token counting | [`token`] |
//! | Model limits and capabilities | [`registry`] |
//! | History packing under a budget | [`builder`] |
//! | Passage rendering and citations | [`passages`] |
//! | Prompt templates | [`template`] |

pub mod builder;
pub mod passages;
pub mod registry;
pub mod template;
pub mod token;

pub use builder::{MessageSequence, MessageSequenceBuilder};
pub use passages::{Citation, CitationLookup, ContextBlock, NO_SOURCES, PassageGroup, RetrievedPassage, nonewlines};
pub use registry::{ModelCapabilities, ModelRegistry, ModelSpec, SourcesPlacement};
pub use template::{PromptTemplate, Slot, SlotValues};
pub use token::{MESSAGE_OVERHEAD, TiktokenCounter, TokenCounter, message_cost, messages_cost};
