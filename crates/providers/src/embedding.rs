//! Client for the enrichment service's embedding endpoint.
//!
//! `POST {service}/models/{model}/embed` with a one-element JSON array
//! holding the quoted query; the vector comes back under `data`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sourcechat_core::error::EmbeddingError;
use sourcechat_core::retrieval::EmbeddingClient;
use tracing::{debug, error};

/// Embeds queries through the enrichment web service.
pub struct EnrichmentEmbeddingClient {
    service_url: String,
    escaped_model: String,
    client: reqwest::Client,
}

impl EnrichmentEmbeddingClient {
    pub fn new(
        service_url: impl Into<String>,
        target_model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            escaped_model: escape_model_name(target_model),
            client,
        })
    }

    /// Build from the `[embedding]` config section.
    pub fn from_config(config: &sourcechat_config::EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::new(
            &config.service_url,
            &config.target_model,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!("{}/models/{}/embed", self.service_url, self.escaped_model)
    }
}

/// Model names travel in the URL path: anything outside `[A-Za-z0-9_.-]`
/// becomes `_` (so `BAAI/bge-small-en-v1.5` → `BAAI_bge-small-en-v1.5`).
pub fn escape_model_name(model: &str) -> String {
    model
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingClient for EnrichmentEmbeddingClient {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let url = self.url();
        let body = [format!("\"{text}\"")];

        debug!(model = %self.escaped_model, chars = text.len(), "Requesting query embedding");

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Embedding request failed");
                if e.is_timeout() {
                    EmbeddingError::Timeout(e.to_string())
                } else {
                    EmbeddingError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            error!(status, "Embedding service returned an error");
            return Err(EmbeddingError::Status(status));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = parsed.data.into_vector();
        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty vector".into()));
        }
        Ok(vector)
    }
}

// ── API types (internal) ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: EmbedData,
}

/// The service answers a batch of one either flat or nested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbedData {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl EmbedData {
    fn into_vector(self) -> Vec<f32> {
        match self {
            Self::Flat(v) => v,
            Self::Nested(vs) => vs.into_iter().next().unwrap_or_default(),
        }
    }
}
