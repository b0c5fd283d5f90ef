//! The chat pipeline: embed → search → assemble → stream.
//!
//! # Flow
//!
//! 1. Resolve the model, response length and system prompt (configuration
//!    errors surface here, before any network call)
//! 2. Embed the user's question
//! 3. Search the index: once, or once per compared entity concurrently
//! 4. Render passages into a context block and citation lookup
//! 5. Pack system prompt, few-shots, history and the current turn into
//!    the model's token budget
//! 6. Stream the completion back as [`ChatRecord`]s
//!
//! Each request runs on its own task. Dropping the receiver returned by
//! [`ChatPipeline::run`] cancels it: the task stops at its next send and
//! drops the completion stream, which closes the upstream connection.

use std::sync::Arc;

use futures::future::try_join_all;
use sourcechat_config::AppConfig;
use sourcechat_core::error::{ContextError, Error};
use sourcechat_core::message::Message;
use sourcechat_core::provider::{ChatCompletionRequest, CompletionClient, SamplingParams};
use sourcechat_core::retrieval::{
    EmbeddingClient, PassthroughLinker, RetrievalClient, SearchHit, SearchQuery, SourceLinker,
};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::context::builder::MessageSequenceBuilder;
use crate::context::passages::{ContextBlock, PassageGroup};
use crate::context::registry::{ModelRegistry, SourcesPlacement};
use crate::context::template::{Slot, SlotValues};
use crate::context::token::{TiktokenCounter, TokenCounter, message_cost, messages_cost};
use crate::filter::SearchFilter;
use crate::prompts::{self, PromptOverride, ResponseLength};
use crate::request::ChatRequest;
use crate::stream_event::{ChatRecord, UsageReport};

/// Seed sent to models that accept one, for repeatable answers.
pub const COMPLETION_SEED: u64 = 42;

const CHANNEL_CAPACITY: usize = 128;

/// Process-wide pipeline settings. Per-request options override them.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deployment name sent to the completion engine.
    pub deployment: String,
    /// Registry id of the model behind the deployment.
    pub model: String,
    pub top_k: usize,
    pub response_length: u32,
    /// Forces sources into one message. `None` defers to the model.
    pub sources_placement: Option<SourcesPlacement>,
    pub suggest_followup_questions: bool,
    pub semantic_captions: bool,
    /// Whether the index supports semantic reranking at all.
    pub use_semantic_reranker: bool,
    pub system_persona: String,
    pub user_persona: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            deployment: config.openai.deployment.clone(),
            model: config.openai.model_name.clone(),
            top_k: config.chat.top_k,
            response_length: config.chat.response_length,
            sources_placement: config
                .chat
                .sources_placement
                .as_deref()
                .and_then(SourcesPlacement::parse),
            suggest_followup_questions: config.chat.suggest_followup_questions,
            semantic_captions: config.chat.semantic_captions,
            use_semantic_reranker: config.search.use_semantic_reranker,
            system_persona: config.chat.system_persona.clone(),
            user_persona: config.chat.user_persona.clone(),
        }
    }
}

/// Whether the request ran to the end or the caller went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

/// Everything resolved from configuration before any network call.
struct Prepared {
    query: String,
    system_prompt: String,
    response_length: ResponseLength,
    comparison: bool,
}

/// Runs chat requests against injected collaborators.
///
/// Cheap to clone; every collaborator is behind an `Arc`.
#[derive(Clone)]
pub struct ChatPipeline {
    completion: Arc<dyn CompletionClient>,
    retrieval: Arc<dyn RetrievalClient>,
    embedding: Arc<dyn EmbeddingClient>,
    linker: Arc<dyn SourceLinker>,
    counter: Arc<dyn TokenCounter>,
    registry: Arc<ModelRegistry>,
    config: PipelineConfig,
}

impl ChatPipeline {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        retrieval: Arc<dyn RetrievalClient>,
        embedding: Arc<dyn EmbeddingClient>,
        registry: Arc<ModelRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            completion,
            retrieval,
            embedding,
            linker: Arc::new(PassthroughLinker),
            counter: Arc::new(TiktokenCounter),
            registry,
            config,
        }
    }

    /// Use this linker to turn stored paths into citation URLs.
    pub fn with_linker(mut self, linker: Arc<dyn SourceLinker>) -> Self {
        self.linker = linker;
        self
    }

    /// Count tokens with this counter instead of `tiktoken`.
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a request. Records arrive on the returned receiver; the last
    /// one is always a usage record or an error record, unless the
    /// receiver is dropped first.
    pub fn run(&self, request: ChatRequest) -> mpsc::Receiver<ChatRecord> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pipeline = self.clone();
        let span = info_span!(
            "chat",
            request_id = %Uuid::new_v4(),
            model = %self.config.model,
            comparison = request.entity_comparison,
        );

        tokio::spawn(
            async move {
                match pipeline.execute(request, &tx).await {
                    Ok(Outcome::Completed) => info!("Chat request completed"),
                    Ok(Outcome::Cancelled) => debug!("Caller dropped the stream, stopping"),
                    Err(e) => {
                        warn!(error = %e, configuration = e.is_configuration(), "Chat request failed");
                        let _ = tx.send(ChatRecord::error(e.to_string())).await;
                    }
                }
            }
            .instrument(span),
        );

        rx
    }

    async fn execute(
        &self,
        request: ChatRequest,
        tx: &mpsc::Sender<ChatRecord>,
    ) -> Result<Outcome, Error> {
        let spec = self.registry.spec(&self.config.model)?.clone();
        let tokenizer = spec.tokenizer.as_str();
        let caps = spec.capabilities;
        let prepared = self.prepare(&request)?;

        // ── Retrieve ──
        let vector = self.embedding.embed(&prepared.query).await?;
        debug!(dimensions = vector.len(), "Query embedded");

        let groups = if prepared.comparison {
            self.search_entities(&request, &prepared.query, vector).await?
        } else {
            self.search_single(&request, &prepared.query, vector).await?
        };
        let block = ContextBlock::from_groups(&groups, self.linker.as_ref());
        info!(passages = block.passages.len(), "Search complete");

        // ── Assemble ──
        let placement = self
            .config
            .sources_placement
            .unwrap_or(caps.sources_placement);
        let (system_prompt, current_turn) = match placement {
            SourcesPlacement::UserMessage => (
                prepared.system_prompt.clone(),
                format!("{}Sources:\n{}\n\n", prepared.query, block.text()),
            ),
            SourcesPlacement::SystemMessage => (
                format!("{}\n\nSources:{}", prepared.system_prompt, block.text()),
                prepared.query.clone(),
            ),
        };

        let few_shots = if request.options.include_few_shots {
            prompts::response_few_shots()
        } else {
            Vec::new()
        };

        let budget = spec.prompt_budget();
        let builder = MessageSequenceBuilder::new(self.counter.as_ref(), &self.registry);
        let sequence = builder.build(
            &system_prompt,
            &spec.id,
            &request.messages,
            &current_turn,
            budget,
            &few_shots,
        )?;
        if sequence.over_budget() {
            return Err(ContextError::BudgetExceeded {
                required: sequence.total_tokens,
                budget,
            }
            .into());
        }

        let counter = self.counter.as_ref();
        let query_tokens = message_cost(counter, &Message::user(&prepared.query), tokenizer)?;
        let system_prompt_tokens =
            message_cost(counter, &Message::system(&prepared.system_prompt), tokenizer)?;
        let content_tokens = message_cost(counter, &Message::user(block.text()), tokenizer)?;
        let history_tokens = messages_cost(counter, &request.messages, tokenizer)?;

        // ── Generate ──
        let temperature = request
            .options
            .temperature
            .unwrap_or(caps.default_temperature);
        let completion_request = ChatCompletionRequest {
            deployment: self.config.deployment.clone(),
            messages: sequence.into_messages(),
            sampling: SamplingParams {
                temperature,
                max_tokens: caps
                    .passes_max_tokens
                    .then(|| prepared.response_length.tokens()),
                seed: caps.supports_seed.then_some(COMPLETION_SEED),
            },
        };

        if tx.is_closed() {
            return Ok(Outcome::Cancelled);
        }

        debug!(
            client = self.completion.name(),
            deployment = %completion_request.deployment,
            messages = completion_request.messages.len(),
            "Opening completion stream"
        );
        let mut stream = self.completion.stream_chat(completion_request).await?;

        if tx
            .send(ChatRecord::Citations {
                citation_lookup: block.citations.clone(),
            })
            .await
            .is_err()
        {
            return Ok(Outcome::Cancelled);
        }

        let mut answer = String::new();
        while let Some(item) = stream.recv().await {
            let chunk = item?;
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                answer.push_str(&content);
                if tx.send(ChatRecord::Content { content }).await.is_err() {
                    return Ok(Outcome::Cancelled);
                }
            }
            if chunk.done {
                break;
            }
        }

        let completion_tokens = message_cost(counter, &Message::assistant(&answer), tokenizer)?;
        let usage = UsageReport {
            query_tokens,
            system_prompt_tokens,
            content_tokens,
            history_tokens,
            completion_tokens,
            model: spec.id.clone(),
        };
        if tx.send(ChatRecord::Usage(usage)).await.is_err() {
            return Ok(Outcome::Cancelled);
        }

        Ok(Outcome::Completed)
    }

    /// Resolve everything that depends only on configuration and the
    /// request, so bad settings fail before any network call.
    fn prepare(&self, request: &ChatRequest) -> Result<Prepared, Error> {
        let query = request
            .query()
            .ok_or(ContextError::EmptyHistory)?
            .to_string();

        let options = &request.options;
        let response_length = ResponseLength::try_from(
            options.response_length.unwrap_or(self.config.response_length),
        )?;

        let prompt_override = PromptOverride::parse(options.prompt_template.as_deref());
        let template = prompts::system_template(request.entity_comparison, &prompt_override)?;

        let follow_up = if options
            .suggest_followup_questions
            .unwrap_or(self.config.suggest_followup_questions)
        {
            prompts::FOLLOW_UP_QUESTIONS_PROMPT
        } else {
            ""
        };

        let values = SlotValues::new()
            .with(Slot::PromptIndustry, request.user.industry.as_str())
            .with(
                Slot::SystemPersona,
                options
                    .system_persona
                    .as_deref()
                    .unwrap_or(&self.config.system_persona),
            )
            .with(Slot::UserTitle, request.user.title.as_str())
            .with(
                Slot::SourcesSection,
                prompts::comparison_sources_section(&request.selected_entities),
            )
            .with(Slot::FollowUpQuestionsPrompt, follow_up)
            .with(Slot::ResponseLengthPrompt, response_length.prompt())
            .with(
                Slot::UserPersona,
                options
                    .user_persona
                    .as_deref()
                    .unwrap_or(&self.config.user_persona),
            )
            .with(Slot::InjectedPrompt, prompt_override.injected_text());

        Ok(Prepared {
            query,
            system_prompt: template.render(&values)?,
            response_length,
            comparison: request.entity_comparison,
        })
    }

    fn base_query(&self, request: &ChatRequest, query: &str, vector: Vec<f32>) -> SearchQuery {
        let options = &request.options;
        let use_reranking = self.config.use_semantic_reranker && options.semantic_ranker;
        SearchQuery {
            text: (!use_reranking).then(|| query.to_string()),
            vector,
            filter: None,
            top_k: options.top_k.unwrap_or(self.config.top_k),
            use_reranking,
            use_captions: use_reranking
                && options
                    .semantic_captions
                    .unwrap_or(self.config.semantic_captions),
        }
    }

    fn filter_for(&self, request: &ChatRequest, entity: &str) -> String {
        SearchFilter::for_entity(entity)
            .document_types(&request.document_types)
            .years(&request.selected_years)
            .render()
    }

    async fn search_single(
        &self,
        request: &ChatRequest,
        query: &str,
        vector: Vec<f32>,
    ) -> Result<Vec<PassageGroup>, Error> {
        let mut search = self.base_query(request, query, vector);
        search.filter = Some(self.filter_for(request, &request.user.legal_entity));
        debug!(filter = ?search.filter, top_k = search.top_k, "Searching index");

        let hits = self.retrieval.search(search).await?;
        Ok(vec![PassageGroup::new(hits)])
    }

    /// One search per entity, run concurrently. Results come back in the
    /// order the entities were requested, whatever order they finish in.
    async fn search_entities(
        &self,
        request: &ChatRequest,
        query: &str,
        vector: Vec<f32>,
    ) -> Result<Vec<PassageGroup>, Error> {
        let base = self.base_query(request, query, vector);
        let searches = request.selected_entities.iter().map(|entity| {
            let mut search = base.clone();
            search.use_captions = false;
            search.filter = Some(self.filter_for(request, entity));
            debug!(entity = %entity, "Searching index for entity");
            self.retrieval.search(search)
        });

        let results: Vec<Vec<SearchHit>> = try_join_all(searches).await?;
        Ok(request
            .selected_entities
            .iter()
            .zip(results)
            .map(|(entity, hits)| PassageGroup::for_entity(entity.clone(), hits))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FakeEmbedding, FakeRetrieval, ScriptedCompletion, WordCounter, collect, hit,
    };
    use sourcechat_core::error::ProviderError;

    fn request(question: &str) -> ChatRequest {
        let mut req = ChatRequest {
            messages: vec![Message::user(question)],
            ..ChatRequest::default()
        };
        req.user.legal_entity = "Contoso".into();
        req.user.industry = "banking".into();
        req.user.title = "analysts".into();
        req
    }

    fn pipeline(
        completion: Arc<ScriptedCompletion>,
        retrieval: Arc<FakeRetrieval>,
        config: PipelineConfig,
    ) -> ChatPipeline {
        ChatPipeline::new(
            completion,
            retrieval,
            Arc::new(FakeEmbedding::new(vec![0.1, 0.2, 0.3])),
            Arc::new(ModelRegistry::builtin()),
            config,
        )
        .with_counter(Arc::new(WordCounter))
    }

    #[tokio::test]
    async fn happy_path_record_order() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["Revenue ", "rose [File0]."]));
        let retrieval = Arc::new(
            FakeRetrieval::new().with_hits("Contoso", vec![hit("Contoso", "ar.pdf", "Revenue rose 5%.")]),
        );
        let p = pipeline(completion.clone(), retrieval, PipelineConfig::default());

        let records = collect(p.run(request("How did revenue change?"))).await;
        assert_eq!(records.len(), 4);
        match &records[0] {
            ChatRecord::Citations { citation_lookup } => {
                assert_eq!(citation_lookup.get("File0").unwrap().citation, "ar.pdf");
            }
            other => panic!("expected citations, got {other:?}"),
        }
        assert_eq!(records[1], ChatRecord::Content { content: "Revenue ".into() });
        match &records[3] {
            ChatRecord::Usage(u) => {
                assert_eq!(u.model, "gpt-4o");
                // "Revenue rose [File0]." = 3 words + 3 overhead
                assert_eq!(u.completion_tokens, 6);
                assert_eq!(u.query_tokens, 4 + 3);
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gpt4_family_sampling() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["ok"]));
        let p = pipeline(completion.clone(), Arc::new(FakeRetrieval::new()), PipelineConfig::default());
        collect(p.run(request("q"))).await;

        let sent = completion.last_request().unwrap();
        assert_eq!(sent.deployment, "gpt-4o");
        assert_eq!(sent.sampling.seed, Some(42));
        assert_eq!(sent.sampling.max_tokens, Some(1024));
        assert!((sent.sampling.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn gpt35_family_sampling_and_sources_in_user_turn() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["ok"]));
        let config = PipelineConfig {
            model: "gpt-35-turbo".into(),
            deployment: "chat35".into(),
            ..PipelineConfig::default()
        };
        let retrieval = Arc::new(
            FakeRetrieval::new().with_hits("Contoso", vec![hit("Contoso", "a.pdf", "Line one\nline two")]),
        );
        let p = pipeline(completion.clone(), retrieval, config);
        let mut req = request("What changed?");
        req.options.temperature = Some(0.9);
        collect(p.run(req)).await;

        let sent = completion.last_request().unwrap();
        assert_eq!(sent.sampling.seed, None);
        assert_eq!(sent.sampling.max_tokens, None);
        assert!((sent.sampling.temperature - 0.9).abs() < f32::EPSILON);

        let last = sent.messages.last().unwrap();
        assert_eq!(
            last.content,
            "What changed?Sources:\n\n  <<<Source:>>>|File0| :Line one line two\n\n"
        );
    }

    #[tokio::test]
    async fn system_placement_override_moves_sources() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["ok"]));
        let config = PipelineConfig {
            sources_placement: Some(SourcesPlacement::SystemMessage),
            ..PipelineConfig::default()
        };
        let p = pipeline(completion.clone(), Arc::new(FakeRetrieval::new()), config);
        collect(p.run(request("Anything?"))).await;

        let sent = completion.last_request().unwrap();
        assert!(sent.messages[0].content.ends_with("Sources:\n NONE"));
        assert_eq!(sent.messages.last().unwrap().content, "Anything?");
    }

    #[tokio::test]
    async fn search_scoped_to_profile_entity() {
        let retrieval = Arc::new(FakeRetrieval::new());
        let p = pipeline(
            Arc::new(ScriptedCompletion::fragments(&["ok"])),
            retrieval.clone(),
            PipelineConfig::default(),
        );
        let mut req = request("q");
        req.selected_years = vec!["2022".into(), "2023".into()];
        req.document_types = vec!["All".into()];
        collect(p.run(req)).await;

        let queries = retrieval.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].filter.as_deref(),
            Some("search.in(entity, 'Contoso', ',') and (year eq 2022 or year eq 2023)")
        );
        assert_eq!(queries[0].text.as_deref(), Some("q"));
        assert_eq!(queries[0].vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(queries[0].top_k, 3);
        assert!(!queries[0].use_reranking);
    }

    #[tokio::test]
    async fn reranking_needs_index_support_and_request() {
        let retrieval = Arc::new(FakeRetrieval::new());
        let config = PipelineConfig {
            use_semantic_reranker: true,
            ..PipelineConfig::default()
        };
        let p = pipeline(Arc::new(ScriptedCompletion::fragments(&["ok"])), retrieval.clone(), config);
        let mut req = request("q");
        req.options.semantic_ranker = true;
        collect(p.run(req)).await;

        let q = &retrieval.queries()[0];
        assert!(q.use_reranking);
        assert!(q.use_captions);
        assert!(q.text.is_none());
    }

    #[tokio::test]
    async fn unknown_model_is_reported_before_network() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["never"]));
        let retrieval = Arc::new(FakeRetrieval::new());
        let config = PipelineConfig {
            model: "gpt-9".into(),
            ..PipelineConfig::default()
        };
        let p = pipeline(completion.clone(), retrieval.clone(), config);

        let records = collect(p.run(request("q"))).await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            ChatRecord::Error { error } => assert!(error.contains("gpt-9")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(retrieval.queries().is_empty());
        assert!(completion.last_request().is_none());
    }

    #[tokio::test]
    async fn unsupported_response_length_is_reported() {
        let p = pipeline(
            Arc::new(ScriptedCompletion::fragments(&["x"])),
            Arc::new(FakeRetrieval::new()),
            PipelineConfig::default(),
        );
        let mut req = request("q");
        req.options.response_length = Some(300);
        let records = collect(p.run(req)).await;
        assert!(matches!(&records[0], ChatRecord::Error { error } if error.contains("300")));
    }

    #[tokio::test]
    async fn empty_history_is_reported() {
        let p = pipeline(
            Arc::new(ScriptedCompletion::fragments(&["x"])),
            Arc::new(FakeRetrieval::new()),
            PipelineConfig::default(),
        );
        let records = collect(p.run(ChatRequest::default())).await;
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], ChatRecord::Error { .. }));
    }

    #[tokio::test]
    async fn stream_open_failure_sends_no_citations() {
        let completion = Arc::new(ScriptedCompletion::failing_open(ProviderError::AuthenticationFailed(
            "bad key".into(),
        )));
        let p = pipeline(completion, Arc::new(FakeRetrieval::new()), PipelineConfig::default());
        let records = collect(p.run(request("q"))).await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            ChatRecord::Error { error } => {
                assert!(error.starts_with("Error generating chat completion:"));
                assert!(error.contains("bad key"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn few_shots_included_on_request() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["ok"]));
        let p = pipeline(completion.clone(), Arc::new(FakeRetrieval::new()), PipelineConfig::default());
        let mut req = request("q");
        req.options.include_few_shots = true;
        collect(p.run(req)).await;

        let sent = completion.last_request().unwrap();
        assert_eq!(&sent.messages[1..5], prompts::response_few_shots().as_slice());
    }

    #[tokio::test]
    async fn injected_prompt_lands_in_system_message() {
        let completion = Arc::new(ScriptedCompletion::fragments(&["ok"]));
        let p = pipeline(completion.clone(), Arc::new(FakeRetrieval::new()), PipelineConfig::default());
        let mut req = request("q");
        req.options.prompt_template = Some(">>>Always answer in French.".into());
        req.options.suggest_followup_questions = Some(true);
        collect(p.run(req)).await;

        let system = &completion.last_request().unwrap().messages[0].content;
        assert!(system.contains("Always answer in French."));
        assert!(system.contains("You are a banking AI"));
        assert!(system.contains("triple chevrons"));
        assert!(system.contains("no more than 1024 tokens"));
    }
}
