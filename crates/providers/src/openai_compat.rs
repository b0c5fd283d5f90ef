//! Streaming chat completions against Azure OpenAI and OpenAI-compatible
//! endpoints.
//!
//! Two URL and auth shapes are supported:
//! - **Azure**: `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...`
//!   with an `api-key` header
//! - **Bearer**: `{endpoint}/chat/completions` with `Authorization: Bearer ...`,
//!   the deployment sent as `model`
//!
//! The response is read as server-sent events and forwarded fragment by
//! fragment through a bounded channel.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sourcechat_core::error::ProviderError;
use sourcechat_core::message::Message;
use sourcechat_core::provider::{
    ChatCompletionRequest, CompletionClient, CompletionStream, StreamChunk, Usage,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// How requests are addressed and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAuth {
    /// Azure deployment URL, `api-key` header.
    Azure { api_version: String },
    /// Plain `/chat/completions`, bearer token.
    Bearer,
}

/// A streaming chat-completion client.
pub struct OpenAiChatClient {
    name: String,
    endpoint: String,
    api_key: String,
    auth: ChatAuth,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        auth: ChatAuth,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to create HTTP client: {e}")))?;

        let name = match auth {
            ChatAuth::Azure { .. } => "azure-openai",
            ChatAuth::Bearer => "openai-compatible",
        };

        Ok(Self {
            name: name.to_string(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            auth,
            client,
        })
    }

    /// Build from the `[openai]` config section.
    pub fn from_config(config: &sourcechat_config::OpenAiConfig) -> Result<Self, ProviderError> {
        let auth = if config.auth == "bearer" {
            ChatAuth::Bearer
        } else {
            ChatAuth::Azure {
                api_version: config.api_version.clone(),
            }
        };
        Self::new(
            &config.endpoint,
            config.api_key.clone().unwrap_or_default(),
            auth,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url_for(&self, deployment: &str) -> String {
        match &self.auth {
            ChatAuth::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint,
                urlencoding::encode(deployment),
                urlencoding::encode(api_version)
            ),
            ChatAuth::Bearer => format!("{}/chat/completions", self.endpoint),
        }
    }

    fn request_body(&self, request: &ChatCompletionRequest) -> serde_json::Value {
        let messages: Vec<ApiMessage<'_>> = request.messages.iter().map(ApiMessage::from).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": request.sampling.temperature,
            "stream": true,
        });

        // Azure addresses the model by URL; bearer endpoints need it in the body.
        if self.auth == ChatAuth::Bearer {
            body["model"] = serde_json::json!(request.deployment);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.sampling.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if let Some(seed) = request.sampling.seed {
            body["seed"] = serde_json::json!(seed);
        }

        body
    }
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
    ) -> std::result::Result<CompletionStream, ProviderError> {
        let url = self.url_for(&request.deployment);
        let body = self.request_body(&request);

        debug!(
            client = %self.name,
            deployment = %request.deployment,
            messages = request.messages.len(),
            "Sending streaming request"
        );

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        let builder = match self.auth {
            ChatAuth::Azure { .. } => builder.header("api-key", &self.api_key),
            ChatAuth::Bearer => builder.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Completion streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let client_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx.send(Ok(done_chunk(None))).await;
                            return;
                        }
                        SseLine::Unparseable(error) => {
                            trace!(
                                client = %client_name,
                                data = %line,
                                error = %error,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                        SseLine::Event(event) => {
                            if let Some(content) = event.content {
                                let chunk = StreamChunk {
                                    content: Some(content),
                                    ..StreamChunk::default()
                                };
                                if tx.send(Ok(chunk)).await.is_err() {
                                    debug!(client = %client_name, "Consumer dropped, closing stream");
                                    return;
                                }
                            }
                            if let Some(usage) = event.usage {
                                let _ = tx.send(Ok(done_chunk(Some(usage)))).await;
                                return;
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(done_chunk(None))).await;
        });

        Ok(rx)
    }
}

fn done_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        content: None,
        done: true,
        usage,
    }
}

// ── SSE parsing ───────────────────────────────────────────────────────────

/// What one decoded `data:` event carries.
#[derive(Debug, Default, PartialEq)]
struct SseEvent {
    content: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Done,
    Event(SseEvent),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    // Blank separators, `:` comments and non-data fields
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let response = match serde_json::from_str::<StreamResponse>(data) {
        Ok(r) => r,
        Err(e) => return SseLine::Unparseable(e.to_string()),
    };

    // Azure sends a leading chunk with no choices (content filter results).
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|c| !c.is_empty());

    let usage = response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    if content.is_none() && usage.is_none() {
        return SseLine::Skip;
    }
    SseLine::Event(SseEvent { content, usage })
}

// ── API types (internal) ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
