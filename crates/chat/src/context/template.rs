//! Typed prompt templates.
//!
//! A template is parsed once into literal text and [`Slot`] references.
//! Slot names form a closed set, so a typo in a template is caught at
//! parse time, and a slot the caller forgot to fill is caught at render
//! time, both as [`TemplateError`]s.
//!
//! Syntax: `{slot_name}` references a slot; `{{` and `}}` are literal
//! braces.

use std::collections::HashMap;

use sourcechat_core::error::TemplateError;

/// Every slot a prompt template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    PromptIndustry,
    SystemPersona,
    UserTitle,
    SourcesSection,
    FollowUpQuestionsPrompt,
    ResponseLengthPrompt,
    UserPersona,
    InjectedPrompt,
}

impl Slot {
    pub const ALL: [Slot; 8] = [
        Slot::PromptIndustry,
        Slot::SystemPersona,
        Slot::UserTitle,
        Slot::SourcesSection,
        Slot::FollowUpQuestionsPrompt,
        Slot::ResponseLengthPrompt,
        Slot::UserPersona,
        Slot::InjectedPrompt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PromptIndustry => "prompt_industry",
            Self::SystemPersona => "system_persona",
            Self::UserTitle => "user_title",
            Self::SourcesSection => "sources_section",
            Self::FollowUpQuestionsPrompt => "follow_up_questions_prompt",
            Self::ResponseLengthPrompt => "response_length_prompt",
            Self::UserPersona => "user_persona",
            Self::InjectedPrompt => "injected_prompt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Slot(Slot),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    parts: Vec<Part>,
}

impl PromptTemplate {
    /// Parse a template, rejecting unknown or unterminated slots.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    text.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated(pos));
                    }
                    let slot =
                        Slot::from_name(&name).ok_or(TemplateError::UnknownSlot(name))?;
                    if !text.is_empty() {
                        parts.push(Part::Text(std::mem::take(&mut text)));
                    }
                    parts.push(Part::Slot(slot));
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(Self { parts })
    }

    /// Slots referenced by this template, in first-use order.
    pub fn slots(&self) -> Vec<Slot> {
        let mut seen = Vec::new();
        for part in &self.parts {
            if let Part::Slot(s) = part {
                if !seen.contains(s) {
                    seen.push(*s);
                }
            }
        }
        seen
    }

    pub fn references(&self, slot: Slot) -> bool {
        self.parts.iter().any(|p| *p == Part::Slot(slot))
    }

    /// Fill every slot. Fails on the first referenced slot with no value.
    pub fn render(&self, values: &SlotValues) -> Result<String, TemplateError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Slot(slot) => {
                    let value = values
                        .get(*slot)
                        .ok_or_else(|| TemplateError::MissingSlot(slot.name().to_string()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl std::str::FromStr for PromptTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Values for template slots. An empty string is a supplied value.
#[derive(Debug, Clone, Default)]
pub struct SlotValues(HashMap<Slot, String>);

impl SlotValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: Slot, value: impl Into<String>) -> Self {
        self.0.insert(slot, value.into());
        self
    }

    pub fn set(&mut self, slot: Slot, value: impl Into<String>) {
        self.0.insert(slot, value.into());
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.0.get(&slot).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_slots_and_text() {
        let t = PromptTemplate::parse("You are a {prompt_industry} AI {system_persona}.").unwrap();
        let out = t
            .render(
                &SlotValues::new()
                    .with(Slot::PromptIndustry, "banking")
                    .with(Slot::SystemPersona, "assistant"),
            )
            .unwrap();
        assert_eq!(out, "You are a banking AI assistant.");
    }

    #[test]
    fn unknown_slot_fails_at_parse() {
        let err = PromptTemplate::parse("Hello {userPersona}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownSlot("userPersona".into()));
    }

    #[test]
    fn missing_value_fails_at_render() {
        let t = PromptTemplate::parse("{user_title} asks").unwrap();
        let err = t.render(&SlotValues::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingSlot("user_title".into()));
    }

    #[test]
    fn empty_value_is_supplied() {
        let t = PromptTemplate::parse("a{injected_prompt}b").unwrap();
        let out = t.render(&SlotValues::new().with(Slot::InjectedPrompt, "")).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn unterminated_slot_reports_position() {
        let err = PromptTemplate::parse("abc {user_title").unwrap_err();
        assert_eq!(err, TemplateError::Unterminated(4));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let t = PromptTemplate::parse("{{\"json\": true}} {user_title}").unwrap();
        assert_eq!(t.slots(), vec![Slot::UserTitle]);
        let out = t.render(&SlotValues::new().with(Slot::UserTitle, "x")).unwrap();
        assert_eq!(out, "{\"json\": true} x");
    }

    #[test]
    fn repeated_slot_listed_once() {
        let t = PromptTemplate::parse("{user_title} and {user_title} and {user_persona}").unwrap();
        assert_eq!(t.slots(), vec![Slot::UserTitle, Slot::UserPersona]);
        assert!(t.references(Slot::UserPersona));
        assert!(!t.references(Slot::SourcesSection));
    }

    #[test]
    fn slot_names_roundtrip() {
        for slot in Slot::ALL {
            assert_eq!(Slot::from_name(slot.name()), Some(slot));
        }
    }

    #[test]
    fn unused_values_are_ignored() {
        let t = PromptTemplate::parse("plain").unwrap();
        let out = t.render(&SlotValues::new().with(Slot::UserTitle, "x")).unwrap();
        assert_eq!(out, "plain");
    }
}
