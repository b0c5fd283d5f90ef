//! Records streamed back to the caller.
//!
//! Each record is one JSON object on its own line:
//! - `{"citation_lookup": {...}}` first
//! - `{"content": "..."}` per generated fragment
//! - a usage record last, or `{"error": "..."}` if anything failed

use serde::{Deserialize, Serialize};

use crate::context::passages::CitationLookup;

/// Token accounting for one answered request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub query_tokens: usize,
    pub system_prompt_tokens: usize,
    pub content_tokens: usize,
    pub history_tokens: usize,
    pub completion_tokens: usize,
    pub model: String,
}

/// One line of the response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRecord {
    /// Moniker → citation for every passage in the prompt.
    Citations { citation_lookup: CitationLookup },

    /// A fragment of the answer.
    Content { content: String },

    /// Final accounting. Ends a successful stream.
    Usage(UsageReport),

    /// Ends a failed stream. Fragments already sent stand.
    Error { error: String },
}

impl ChatRecord {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Whether this record ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::Error { .. })
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_record_shape() {
        let line = ChatRecord::Content {
            content: "Hello".into(),
        }
        .to_ndjson_line();
        assert_eq!(line, "{\"content\":\"Hello\"}\n");
    }

    #[test]
    fn error_record_shape() {
        let line = ChatRecord::error("Error generating embedding: timeout").to_ndjson_line();
        assert_eq!(line, "{\"error\":\"Error generating embedding: timeout\"}\n");
    }

    #[test]
    fn empty_citations_record() {
        let json = serde_json::to_string(&ChatRecord::Citations {
            citation_lookup: CitationLookup::default(),
        })
        .unwrap();
        assert_eq!(json, r#"{"citation_lookup":{}}"#);
    }

    #[test]
    fn usage_record_is_flat() {
        let record = ChatRecord::Usage(UsageReport {
            query_tokens: 7,
            system_prompt_tokens: 300,
            content_tokens: 120,
            history_tokens: 40,
            completion_tokens: 55,
            model: "gpt-4o".into(),
        });
        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["query_tokens"], 7);
        assert_eq!(value["model"], "gpt-4o");
        assert!(value.get("Usage").is_none());
        assert!(record.is_terminal());
    }

    #[test]
    fn records_roundtrip_from_lines() {
        let content: ChatRecord = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert_eq!(content, ChatRecord::Content { content: "x".into() });
        assert!(!content.is_terminal());

        let error: ChatRecord = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert!(error.is_terminal());
    }
}
