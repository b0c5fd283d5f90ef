//! Context-block formatting.
//!
//! Turns search hits into moniker-tagged segments for the prompt and a
//! citation lookup for the caller. Monikers are `File0..File(N-1)`, given
//! out in group order then hit order, so they never depend on which
//! concurrent search finished first.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sourcechat_core::retrieval::{SearchHit, SourceLinker};

/// Rendered block when no passages were retrieved.
pub const NO_SOURCES: &str = "\n NONE";

/// Replace line breaks with spaces so each passage stays on one line.
pub fn nonewlines(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

/// Hits from one search call, labelled with the entity it was scoped to
/// when running a comparison.
#[derive(Debug, Clone, Default)]
pub struct PassageGroup {
    pub entity: Option<String>,
    pub hits: Vec<SearchHit>,
}

impl PassageGroup {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { entity: None, hits }
    }

    pub fn for_entity(entity: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        Self {
            entity: Some(entity.into()),
            hits,
        }
    }
}

/// A passage with its moniker assigned. Lives for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub moniker: String,
    pub source_document_name: String,
    pub page_number: String,
    pub content: String,
    pub source_path: String,
    pub entity: Option<String>,
}

impl RetrievedPassage {
    fn render(&self) -> String {
        match &self.entity {
            Some(entity) => format!(
                " <<<{} Source:>>>|{}| :{}",
                nonewlines(entity),
                self.moniker,
                nonewlines(&self.content)
            ),
            None => format!(" <<<Source:>>>|{}| :{}", self.moniker, nonewlines(&self.content)),
        }
    }
}

/// Display metadata for one moniker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub citation: String,
    pub source_path: String,
    pub page_number: String,
}

/// Moniker → citation, in assignment order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationLookup(IndexMap<String, Citation>);

impl CitationLookup {
    pub fn get(&self, moniker: &str) -> Option<&Citation> {
        self.0.get(moniker)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn monikers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Citation)> {
        self.0.iter()
    }
}

/// Formatted passages, ready to fold into a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub passages: Vec<RetrievedPassage>,
    pub citations: CitationLookup,
    text: String,
}

impl ContextBlock {
    /// Assign monikers across all groups and render the block.
    pub fn from_groups(groups: &[PassageGroup], linker: &dyn SourceLinker) -> Self {
        let mut passages = Vec::new();
        let mut citations = IndexMap::new();

        for group in groups {
            for hit in &group.hits {
                let moniker = format!("File{}", passages.len());
                let page_number = hit
                    .page_numbers
                    .first()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "0".to_string());
                let source_path = linker.link(&hit.source_file);

                citations.insert(
                    moniker.clone(),
                    Citation {
                        citation: hit.display_name.clone(),
                        source_path: source_path.clone(),
                        page_number: page_number.clone(),
                    },
                );
                passages.push(RetrievedPassage {
                    moniker,
                    source_document_name: hit.display_name.clone(),
                    page_number,
                    content: hit.content.clone(),
                    source_path,
                    entity: group.entity.clone(),
                });
            }
        }

        let segments: String = passages.iter().map(RetrievedPassage::render).collect();
        let text = if segments.is_empty() {
            NO_SOURCES.to_string()
        } else {
            format!("\n {segments}")
        };

        Self {
            passages,
            citations: CitationLookup(citations),
            text,
        }
    }

    /// The rendered block (or the no-sources sentinel).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}
