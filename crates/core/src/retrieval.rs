//! Retrieval-side collaborators: search index, embedding service, and the
//! source linker that turns stored document paths into readable URLs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, RetrievalError};

/// A single search call against the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Keyword text. `None` runs a pure vector query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Query embedding for the vector part of the search.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    /// Backend filter expression (OData for Azure AI Search).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Maximum number of hits to return.
    pub top_k: usize,

    /// Ask the backend to rerank semantically.
    #[serde(default)]
    pub use_reranking: bool,

    /// Ask the backend for extractive captions (reranking only).
    #[serde(default)]
    pub use_captions: bool,
}

/// A scored passage returned by the index, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Passage text.
    pub content: String,

    /// Storage path of the source document (without access token).
    pub source_file: String,

    /// Pages the passage was extracted from.
    #[serde(default)]
    pub page_numbers: Vec<u32>,

    /// Human-facing document name used in citations.
    pub display_name: String,

    /// Entity (organisation) the document belongs to.
    #[serde(default)]
    pub entity: String,
}

/// Similarity / keyword search against the document index.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Run one query and return hits in rank order.
    async fn search(&self, query: SearchQuery) -> std::result::Result<Vec<SearchHit>, RetrievalError>;
}

/// Text embedding service.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text. Failure is fatal to the request; callers must
    /// not substitute a fallback vector.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

/// Turns a stored source path into a URL the caller can open.
pub trait SourceLinker: Send + Sync {
    fn link(&self, source_file: &str) -> String;
}

/// Linker that hands paths back unchanged (public containers, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLinker;

impl SourceLinker for PassthroughLinker {
    fn link(&self, source_file: &str) -> String {
        source_file.to_string()
    }
}
