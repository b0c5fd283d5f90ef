//! Scripted collaborators for exercising the pipeline without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sourcechat_core::error::{ContextError, EmbeddingError, ProviderError, RetrievalError};
use sourcechat_core::provider::{
    ChatCompletionRequest, CompletionClient, CompletionStream, StreamChunk,
};
use sourcechat_core::retrieval::{EmbeddingClient, RetrievalClient, SearchHit, SearchQuery};
use tokio::sync::mpsc;

use crate::context::token::TokenCounter;
use crate::stream_event::ChatRecord;

/// Counts whitespace-separated words, whatever the tokenizer id.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str, _tokenizer_id: &str) -> Result<usize, ContextError> {
        Ok(text.split_whitespace().count())
    }
}

/// `n` space-separated words.
pub fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

/// A search hit for `entity` from `file`.
pub fn hit(entity: &str, file: &str, content: &str) -> SearchHit {
    SearchHit {
        content: content.to_string(),
        source_file: format!("https://acct.blob.core.windows.net/upload/{entity}/{file}"),
        page_numbers: vec![1],
        display_name: file.to_string(),
        entity: entity.to_string(),
    }
}

/// Drain a record stream to the end.
pub async fn collect(mut rx: mpsc::Receiver<ChatRecord>) -> Vec<ChatRecord> {
    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    records
}

#[derive(Default)]
struct Progress {
    sent: AtomicUsize,
    cancelled: AtomicBool,
}

/// A completion client that streams a fixed script.
///
/// Each step is a fragment or an error. After the last step a `done`
/// chunk is sent, unless a step was an error.
pub struct ScriptedCompletion {
    script: Vec<Result<String, ProviderError>>,
    open_error: Option<ProviderError>,
    delay: Option<Duration>,
    last_request: Mutex<Option<ChatCompletionRequest>>,
    progress: Arc<Progress>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script,
            open_error: None,
            delay: None,
            last_request: Mutex::new(None),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn fragments(fragments: &[&str]) -> Self {
        Self::new(fragments.iter().map(|f| Ok(f.to_string())).collect())
    }

    /// Fails when the stream is opened, before any fragment.
    pub fn failing_open(error: ProviderError) -> Self {
        let mut s = Self::new(Vec::new());
        s.open_error = Some(error);
        s
    }

    /// Wait this long before each step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn last_request(&self) -> Option<ChatCompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// True once a send found the consumer gone.
    pub fn was_cancelled(&self) -> bool {
        self.progress.cancelled.load(Ordering::SeqCst)
    }

    /// Steps delivered so far.
    pub fn sent(&self) -> usize {
        self.progress.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some(request);
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::channel(1);
        let script = self.script.clone();
        let delay = self.delay;
        let progress = self.progress.clone();

        tokio::spawn(async move {
            for step in script {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                let is_err = step.is_err();
                let item = step.map(|content| StreamChunk {
                    content: Some(content),
                    ..StreamChunk::default()
                });
                if tx.send(item).await.is_err() {
                    progress.cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                progress.sent.fetch_add(1, Ordering::SeqCst);
                if is_err {
                    return;
                }
            }
            let done = StreamChunk {
                done: true,
                ..StreamChunk::default()
            };
            if tx.send(Ok(done)).await.is_err() {
                progress.cancelled.store(true, Ordering::SeqCst);
            }
        });

        Ok(rx)
    }
}

/// A search index keyed by entity name.
///
/// A query is matched to the first registered entity quoted in its filter.
/// Each entity can answer after its own delay, to force completion order.
#[derive(Default)]
pub struct FakeRetrieval {
    entities: Vec<(String, Duration, Vec<SearchHit>)>,
    failures: HashMap<String, RetrievalError>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl FakeRetrieval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(self, entity: &str, hits: Vec<SearchHit>) -> Self {
        self.with_delayed_hits(entity, Duration::ZERO, hits)
    }

    pub fn with_delayed_hits(mut self, entity: &str, delay: Duration, hits: Vec<SearchHit>) -> Self {
        self.entities.push((entity.to_string(), delay, hits));
        self
    }

    pub fn failing_for(mut self, entity: &str, error: RetrievalError) -> Self {
        self.failures.insert(entity.to_string(), error);
        self
    }

    /// Queries received, in arrival order.
    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalClient for FakeRetrieval {
    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>, RetrievalError> {
        let filter = query.filter.clone().unwrap_or_default();
        self.queries.lock().unwrap().push(query);

        if let Some((_, error)) = self
            .failures
            .iter()
            .find(|(entity, _)| filter.contains(&format!("'{entity}'")))
        {
            return Err(error.clone());
        }

        let Some((_, delay, hits)) = self
            .entities
            .iter()
            .find(|(entity, _, _)| filter.contains(&format!("'{entity}'")))
        else {
            return Ok(Vec::new());
        };

        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        Ok(hits.clone())
    }
}

/// An embedding service returning a fixed vector, or a fixed error.
pub struct FakeEmbedding {
    result: Result<Vec<f32>, EmbeddingError>,
    calls: AtomicUsize,
}

impl FakeEmbedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            result: Ok(vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: EmbeddingError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}
