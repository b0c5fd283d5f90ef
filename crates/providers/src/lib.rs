//! Network clients for SourceChat's external collaborators.
//!
//! Each client implements one of the `sourcechat-core` traits:
//! - [`OpenAiChatClient`] → `CompletionClient`
//! - [`AzureSearchClient`] → `RetrievalClient`
//! - [`EnrichmentEmbeddingClient`] → `EmbeddingClient`
//! - [`BlobSasSigner`] → `SourceLinker`
//!
//! [`build_from_config`] wires all four from an `AppConfig`.

pub mod embedding;
pub mod openai_compat;
pub mod search;
pub mod storage;

use std::sync::Arc;

use sourcechat_config::AppConfig;
use sourcechat_core::error::{Error, Result};
use sourcechat_core::provider::CompletionClient;
use sourcechat_core::retrieval::{EmbeddingClient, PassthroughLinker, RetrievalClient, SourceLinker};
use tracing::info;

pub use embedding::EnrichmentEmbeddingClient;
pub use openai_compat::{ChatAuth, OpenAiChatClient};
pub use search::AzureSearchClient;
pub use storage::BlobSasSigner;

/// The collaborators a chat pipeline needs, built from configuration.
#[derive(Clone)]
pub struct Clients {
    pub completion: Arc<dyn CompletionClient>,
    pub retrieval: Arc<dyn RetrievalClient>,
    pub embedding: Arc<dyn EmbeddingClient>,
    pub linker: Arc<dyn SourceLinker>,
}

/// Build every client from configuration.
///
/// Missing endpoints and credentials are reported here, before any
/// request is made.
pub fn build_from_config(config: &AppConfig) -> Result<Clients> {
    require(&config.openai.endpoint, "openai.endpoint")?;
    require(&config.search.endpoint, "search.endpoint")?;
    require(&config.embedding.service_url, "embedding.service_url")?;
    if config.openai.api_key.as_deref().unwrap_or("").is_empty() {
        return Err(missing("openai.api_key (or SOURCECHAT_OPENAI_KEY)"));
    }
    if config.search.api_key.as_deref().unwrap_or("").is_empty() {
        return Err(missing("search.api_key (or SOURCECHAT_SEARCH_KEY)"));
    }

    let completion = OpenAiChatClient::from_config(&config.openai)?;
    let retrieval = AzureSearchClient::from_config(&config.search)?;
    let embedding = EnrichmentEmbeddingClient::from_config(&config.embedding)?;

    let linker: Arc<dyn SourceLinker> = match BlobSasSigner::from_config(&config.storage)? {
        Some(signer) => Arc::new(signer),
        None => {
            info!("No storage account configured, source links are returned unsigned");
            Arc::new(PassthroughLinker)
        }
    };

    info!(
        completion = completion.name(),
        deployment = %config.openai.deployment,
        index = %config.search.index,
        "Clients ready"
    );

    Ok(Clients {
        completion: Arc::new(completion),
        retrieval: Arc::new(retrieval),
        embedding: Arc::new(embedding),
        linker,
    })
}

fn require(value: &str, key: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(missing(key));
    }
    Ok(())
}

fn missing(key: &str) -> Error {
    Error::Config {
        message: format!("{key} is not set"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.openai.endpoint = "https://res.openai.azure.com".into();
        config.openai.api_key = Some("k".into());
        config.search.endpoint = "https://s.search.windows.net".into();
        config.search.api_key = Some("k".into());
        config.embedding.service_url = "https://enrichment.azurewebsites.net".into();
        config
    }

    #[test]
    fn builds_with_passthrough_linker_when_storage_unset() {
        let clients = build_from_config(&complete_config()).unwrap();
        assert_eq!(clients.completion.name(), "azure-openai");
        assert_eq!(clients.linker.link("a/b.pdf"), "a/b.pdf");
    }

    #[test]
    fn missing_endpoint_is_a_configuration_error() {
        let mut config = complete_config();
        config.search.endpoint.clear();
        let err = build_from_config(&config).err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("search.endpoint"));
    }

    #[test]
    fn missing_key_is_reported() {
        let mut config = complete_config();
        config.openai.api_key = None;
        let err = build_from_config(&config).err().unwrap();
        assert!(err.to_string().contains("openai.api_key"));
    }
}
