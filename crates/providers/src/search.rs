//! Azure AI Search client: hybrid keyword + vector queries with optional
//! semantic reranking.
//!
//! Field names are configurable because indexes built by different
//! ingestion pipelines name them differently.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sourcechat_config::{SearchConfig, SearchFieldsConfig};
use sourcechat_core::error::RetrievalError;
use sourcechat_core::retrieval::{RetrievalClient, SearchHit, SearchQuery};
use tracing::{debug, warn};

/// Queries one Azure AI Search index over REST.
pub struct AzureSearchClient {
    endpoint: String,
    index: String,
    api_version: String,
    api_key: String,
    fields: SearchFieldsConfig,
    semantic_configuration: String,
    client: reqwest::Client,
}

impl AzureSearchClient {
    pub fn from_config(config: &SearchConfig) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            fields: config.fields.clone(),
            semantic_configuration: config.semantic_configuration.clone(),
            client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint,
            urlencoding::encode(&self.index),
            urlencoding::encode(&self.api_version)
        )
    }

    fn request_body(&self, query: &SearchQuery) -> Value {
        let f = &self.fields;
        let select = [&f.content, &f.source_file, &f.page_number, &f.file_name, &f.entity]
            .map(|s| s.as_str())
            .join(",");
        let mut body = json!({
            "top": query.top_k,
            "select": select,
        });

        // Semantic mode ranks on the vector alone; otherwise hybrid.
        body["search"] = if query.use_reranking {
            Value::Null
        } else {
            json!(query.text)
        };

        if let Some(filter) = &query.filter {
            body["filter"] = json!(filter);
        }

        if !query.vector.is_empty() {
            body["vectorQueries"] = json!([{
                "kind": "vector",
                "vector": query.vector,
                "k": query.top_k,
                "fields": f.vector,
            }]);
        }

        if query.use_reranking {
            body["queryType"] = json!("semantic");
            body["semanticConfiguration"] = json!(self.semantic_configuration);
            if query.use_captions {
                body["captions"] = json!("extractive|highlight-false");
            }
        }

        body
    }

    fn to_hit(&self, doc: &Map<String, Value>) -> Result<SearchHit, RetrievalError> {
        let f = &self.fields;
        let text = |field: &str| doc.get(field).and_then(Value::as_str).map(str::to_string);

        let content = text(&f.content).ok_or_else(|| {
            RetrievalError::InvalidResponse(format!("document has no '{}' field", f.content))
        })?;
        let source_file = text(&f.source_file).ok_or_else(|| {
            RetrievalError::InvalidResponse(format!("document has no '{}' field", f.source_file))
        })?;

        Ok(SearchHit {
            content,
            display_name: text(&f.file_name).unwrap_or_else(|| source_file.clone()),
            source_file,
            page_numbers: doc.get(&f.page_number).map(page_numbers).unwrap_or_default(),
            entity: text(&f.entity).unwrap_or_default(),
        })
    }
}

/// Pages come back as an array of ints, a single int, or strings of either.
fn page_numbers(value: &Value) -> Vec<u32> {
    let one = |v: &Value| match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match value {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        other => one(other).into_iter().collect(),
    }
}

#[async_trait]
impl RetrievalClient for AzureSearchClient {
    async fn search(&self, query: SearchQuery) -> std::result::Result<Vec<SearchHit>, RetrievalError> {
        let body = self.request_body(&query);

        debug!(
            index = %self.index,
            top = query.top_k,
            semantic = query.use_reranking,
            filter = query.filter.as_deref().unwrap_or(""),
            "Searching index"
        );

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout(e.to_string())
                } else {
                    RetrievalError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Search request failed");
            return Err(RetrievalError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        let hits = parsed
            .value
            .iter()
            .map(|doc| self.to_hit(doc))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(index = %self.index, hits = hits.len(), "Search complete");
        Ok(hits)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}
