//! # SourceChat Core
//!
//! Domain types, client traits, and error definitions for the SourceChat
//! retrieval-augmented chat backend. This crate carries **no transport
//! dependencies**: it defines the shapes that every other crate agrees on.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (completion engine, search index, embedding
//! service, blob storage) is a trait here. Implementations live in
//! `sourcechat-providers`. This enables:
//! - Swapping implementations via configuration
//! - Substituting scripted fakes in tests
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{
    ContextError, EmbeddingError, Error, ProviderError, Result, RetrievalError, TemplateError,
};
pub use message::{Message, Role};
pub use provider::{
    ChatCompletionRequest, CompletionClient, CompletionStream, SamplingParams, StreamChunk, Usage,
};
pub use retrieval::{
    EmbeddingClient, PassthroughLinker, RetrievalClient, SearchHit, SearchQuery, SourceLinker,
};
