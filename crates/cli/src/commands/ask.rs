//! `sourcechat ask`: Run one chat request and stream NDJSON records.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use sourcechat_chat::{ChatPipeline, ChatRecord, ChatRequest, PipelineConfig};
use sourcechat_config::AppConfig;
use sourcechat_core::message::Message;

#[derive(Debug, Args)]
pub struct AskArgs {
    /// The question; appended as the final user turn
    pub question: Option<String>,

    /// JSON request file (conversation, filters, options)
    #[arg(short, long)]
    pub request: Option<PathBuf>,

    /// Entity whose documents are searched
    #[arg(short, long)]
    pub entity: Option<String>,

    /// Compare these entities side by side (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub compare: Vec<String>,

    /// Restrict to these fiscal years
    #[arg(long = "year")]
    pub years: Vec<String>,

    /// Restrict to these document types
    #[arg(long = "doc-type")]
    pub document_types: Vec<String>,

    #[arg(long)]
    pub top_k: Option<usize>,

    /// 256, 1024 or 2048
    #[arg(long)]
    pub response_length: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Rerank results semantically (index must support it)
    #[arg(long)]
    pub semantic_ranker: bool,

    /// Ask for three follow-up questions after the answer
    #[arg(long)]
    pub followups: bool,

    /// Prepend the response few-shot examples
    #[arg(long)]
    pub few_shots: bool,
}

pub async fn run(config: &AppConfig, args: AskArgs) -> anyhow::Result<()> {
    let request = build_request(args)?;

    let clients = sourcechat_providers::build_from_config(config)?;
    let pipeline = ChatPipeline::new(
        clients.completion,
        clients.retrieval,
        clients.embedding,
        Arc::new(super::registry(config)?),
        PipelineConfig::from_app_config(config),
    )
    .with_linker(clients.linker);

    let mut rx = pipeline.run(request);
    let mut failed = false;
    let mut stdout = std::io::stdout().lock();

    while let Some(record) = rx.recv().await {
        failed |= matches!(record, ChatRecord::Error { .. });
        stdout.write_all(record.to_ndjson_line().as_bytes())?;
        stdout.flush()?;
    }

    if failed {
        bail!("request ended with an error record");
    }
    Ok(())
}

/// Merge the request file (if any) with command-line flags. Flags win.
fn build_request(args: AskArgs) -> anyhow::Result<ChatRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<ChatRequest>(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => ChatRequest::default(),
    };

    if let Some(question) = args.question {
        request.messages.push(Message::user(question));
    }
    if request.messages.is_empty() {
        bail!("nothing to answer: pass a question or a request file with messages");
    }

    if let Some(entity) = args.entity {
        request.user.legal_entity = entity;
    }
    if !args.compare.is_empty() {
        request.entity_comparison = true;
        request.selected_entities = args.compare;
    }
    if !args.years.is_empty() {
        request.selected_years = args.years;
    }
    if !args.document_types.is_empty() {
        request.document_types = args.document_types;
    }

    let options = &mut request.options;
    options.top_k = args.top_k.or(options.top_k);
    options.response_length = args.response_length.or(options.response_length);
    options.temperature = args.temperature.or(options.temperature);
    options.semantic_ranker |= args.semantic_ranker;
    options.include_few_shots |= args.few_shots;
    if args.followups {
        options.suggest_followup_questions = Some(true);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: AskArgs,
    }

    fn parse(argv: &[&str]) -> AskArgs {
        TestCli::try_parse_from(std::iter::once("ask").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn question_and_filters_from_flags() {
        let request = build_request(parse(&[
            "What was net income?",
            "--entity",
            "Contoso",
            "--year",
            "2022",
            "--year",
            "2023",
            "--response-length",
            "256",
        ]))
        .unwrap();

        assert_eq!(request.query(), Some("What was net income?"));
        assert_eq!(request.user.legal_entity, "Contoso");
        assert_eq!(request.selected_years, ["2022", "2023"]);
        assert_eq!(request.options.response_length, Some(256));
        assert!(!request.entity_comparison);
    }

    #[test]
    fn compare_switches_mode() {
        let request = build_request(parse(&["q", "--compare", "Alpha,Beta"])).unwrap();
        assert!(request.entity_comparison);
        assert_eq!(request.selected_entities, ["Alpha", "Beta"]);
    }

    #[test]
    fn empty_request_is_rejected() {
        assert!(build_request(parse(&[])).is_err());
    }

    #[test]
    fn request_file_is_extended_by_question() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"messages":[{{"role":"user","content":"first"}},{{"role":"assistant","content":"answer"}}],
                "user":{{"legal_entity":"Contoso","industry":"energy","title":"analyst"}}}}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let request = build_request(parse(&["follow-up", "--request", &path])).unwrap();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.query(), Some("follow-up"));
        assert_eq!(request.user.industry, "energy");
    }
}
