//! Prompt catalog: system templates, few-shot examples, and the small
//! instruction blocks slotted into them.

use sourcechat_core::error::TemplateError;
use sourcechat_core::message::Message;

use crate::context::template::PromptTemplate;

/// System template for answering from one organisation's documents.
pub const PROPRIETARY_DATA_TEMPLATE: &str = "\
You are a {prompt_industry} AI {system_persona}. Your goal is to help {user_title} get accurate information from their company documents.
{injected_prompt}
Work through the three steps below.

Step one:
**Objective**: Find the information relevant to the question in the sources provided.
**Sources**: Use only the section marked <<<Source:>>>.
**Instructions**: Review every source before answering.

Step two:
**Objective**:
- Answer ONLY with facts found in the sources, and cite them.
- Do not speculate, generalise or add opinions.
**Format**:
- Follow the specifics of the user's question.
- Use bullet points for comparisons and numbered steps for procedures.
- If the sources do not contain the answer, say that you do not have the information.
- Present tabular data as an HTML table.
- Do not mention sources that are not relevant.
- Use double stars to highlight key figures, e.g. **Net Income**.
- Answer in the language the user wrote in.
**Sourcing**:
- Each source is tagged with a moniker such as |File1| followed by a colon and its text. Cite with square brackets, e.g. [File1]. List sources separately, e.g. [File1][File2].
- Put a citation after every fact or bullet point, and under every table.
**Summary**:
- End with a four word summary wrapped in double hashes, e.g. ##Summary of Net Income##

Step three:
- Check that every figure matches its source and every statement carries the right citation.

{response_length_prompt}
{follow_up_questions_prompt}";

/// System template for comparing several organisations side by side.
pub const ENTITY_COMPARISON_TEMPLATE: &str = "\
You are a {prompt_industry} AI {system_persona}. Your goal is to help {user_title} compare documents from different companies.
{injected_prompt}
Work through the three steps below.

Step one:
**Objective**: Find the information about each company named in the sources.
**Sources**:
{sources_section}
**Instructions**: Review every source and keep each company's information separate.

Step two:
**Objective**:
- Answer ONLY with facts found in the sources, and cite them.
- Answer for each company separately. Never mix sources from different companies.
**Format**:
- Use bullet points per company for comparisons and numbered steps per company for procedures.
- If a company's sources do not contain the answer, say so for that company.
- Present tabular data as an HTML table.
- Use double stars to highlight key figures, e.g. **Net Income**.
**Sourcing**:
- Each source is tagged with a moniker such as |File1| followed by a colon and its text. Cite with square brackets, e.g. [File1]. List sources separately, e.g. [File1][File2].
- Put a citation after every fact or bullet point, and under every table.
**Summary**:
- End with a four word summary wrapped in double hashes, e.g. ##Summary of Net Income##

Step three:
- Check that every figure matches its source and every statement carries the right citation.

{response_length_prompt}
{follow_up_questions_prompt}";

/// Appended when follow-up suggestions are requested.
pub const FOLLOW_UP_QUESTIONS_PROMPT: &str = "\
Generate three very short follow-up questions the user is likely to ask next, each wrapped in triple chevrons, e.g. <<<What drove the change in margin?>>>.
Do not repeat questions already asked. Output nothing before or after the questions.";

/// Few-shot pairs that steer answers toward source-grounded replies.
pub fn response_few_shots() -> Vec<Message> {
    vec![
        Message::user("I am looking for information in source documents"),
        Message::assistant(
            "The user wants information from the source documents. Only answer from the source documents.",
        ),
        Message::user("What steps are being taken to promote energy conservation?"),
        Message::assistant(
            "Energy conservation is being promoted by reducing consumption, improving efficiency and increasing the use of renewable sources [File0].",
        ),
    ]
}

/// Supported answer lengths, in completion tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    Summarised,
    Standard,
    Thorough,
}

impl ResponseLength {
    pub fn tokens(&self) -> u32 {
        match self {
            Self::Summarised => 256,
            Self::Standard => 1024,
            Self::Thorough => 2048,
        }
    }

    fn level(&self) -> &'static str {
        match self {
            Self::Summarised => "summarised",
            Self::Standard => "standard",
            Self::Thorough => "thorough",
        }
    }

    /// Instruction text for the `{response_length_prompt}` slot.
    pub fn prompt(&self) -> String {
        format!(
            "Please provide a {} answer. This means that your answer should be no more than {} tokens long.",
            self.level(),
            self.tokens()
        )
    }
}

impl TryFrom<u32> for ResponseLength {
    type Error = TemplateError;

    fn try_from(tokens: u32) -> Result<Self, Self::Error> {
        match tokens {
            256 => Ok(Self::Summarised),
            1024 => Ok(Self::Standard),
            2048 => Ok(Self::Thorough),
            other => Err(TemplateError::UnsupportedResponseLength(other)),
        }
    }
}

/// One source-section line per compared entity, in request order.
pub fn comparison_sources_section(entities: &[String]) -> String {
    entities
        .iter()
        .map(|e| format!("- For {e}: Refer to the section below <<< {e} Sources: >>>\n"))
        .collect()
}

/// How a caller-supplied prompt modifies the built-in template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOverride {
    /// Use the built-in template unchanged.
    Default,
    /// Text placed in the `{injected_prompt}` slot.
    Inject(String),
    /// A complete replacement template.
    Replace(String),
}

impl PromptOverride {
    /// `None` or `"default"` keeps the template, a `>>>` prefix injects
    /// the rest, anything else replaces the template.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("default") | Some("") => Self::Default,
            Some(s) => match s.strip_prefix(">>>") {
                Some(rest) => Self::Inject(format!("{rest}\n ")),
                None => Self::Replace(s.to_string()),
            },
        }
    }

    pub fn injected_text(&self) -> &str {
        match self {
            Self::Inject(text) => text,
            _ => "",
        }
    }
}

/// Resolve the system template for a request.
pub fn system_template(
    comparison: bool,
    prompt_override: &PromptOverride,
) -> Result<PromptTemplate, TemplateError> {
    match prompt_override {
        PromptOverride::Replace(source) => PromptTemplate::parse(source),
        _ if comparison => PromptTemplate::parse(ENTITY_COMPARISON_TEMPLATE),
        _ => PromptTemplate::parse(PROPRIETARY_DATA_TEMPLATE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::template::Slot;

    #[test]
    fn builtin_templates_parse() {
        let t = PromptTemplate::parse(PROPRIETARY_DATA_TEMPLATE).unwrap();
        assert!(!t.references(Slot::SourcesSection));
        assert!(t.references(Slot::InjectedPrompt));

        let c = PromptTemplate::parse(ENTITY_COMPARISON_TEMPLATE).unwrap();
        assert!(c.references(Slot::SourcesSection));
    }

    #[test]
    fn response_length_prompts() {
        assert_eq!(
            ResponseLength::try_from(256).unwrap().prompt(),
            "Please provide a summarised answer. This means that your answer should be no more than 256 tokens long."
        );
        assert_eq!(ResponseLength::try_from(2048).unwrap(), ResponseLength::Thorough);
        assert_eq!(
            ResponseLength::try_from(500).unwrap_err(),
            TemplateError::UnsupportedResponseLength(500)
        );
    }

    #[test]
    fn sources_section_in_request_order() {
        let s = comparison_sources_section(&["Contoso".into(), "Fabrikam".into()]);
        assert_eq!(
            s,
            "- For Contoso: Refer to the section below <<< Contoso Sources: >>>\n\
             - For Fabrikam: Refer to the section below <<< Fabrikam Sources: >>>\n"
        );
    }

    #[test]
    fn override_parsing() {
        assert_eq!(PromptOverride::parse(None), PromptOverride::Default);
        assert_eq!(PromptOverride::parse(Some("default")), PromptOverride::Default);
        assert_eq!(
            PromptOverride::parse(Some(">>>Answer in French.")),
            PromptOverride::Inject("Answer in French.\n ".into())
        );
        assert_eq!(
            PromptOverride::parse(Some("Be brief. {response_length_prompt}")),
            PromptOverride::Replace("Be brief. {response_length_prompt}".into())
        );
    }

    #[test]
    fn replacement_template_is_validated() {
        let err = system_template(false, &PromptOverride::Replace("Hi {nope}".into())).unwrap_err();
        assert_eq!(err, TemplateError::UnknownSlot("nope".into()));
    }

    #[test]
    fn few_shots_alternate_roles() {
        let shots = response_few_shots();
        assert_eq!(shots.len(), 4);
        assert!(shots.chunks(2).all(|p| p[0].role == sourcechat_core::Role::User
            && p[1].role == sourcechat_core::Role::Assistant));
    }
}
