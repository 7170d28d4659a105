//! Tagged chat transcript shared by the assembler and the session.

use serde::{Deserialize, Serialize};

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    System,
    User,
    Assistant,
}

impl Speaker {
    /// Line prefix used in prompts
    pub fn tag(&self) -> &'static str {
        match self {
            Speaker::System => "SYSTEM:",
            Speaker::User => "USER:",
            Speaker::Assistant => "ASSISTANT:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
}

impl Utterance {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }

    /// `TAG: text`, the form the utterance takes inside a prompt
    pub fn render(&self) -> String {
        format!("{} {}", self.speaker.tag(), self.text)
    }
}

/// Append-only, ordered transcript. Utterances are never reordered or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    utterances: Vec<Utterance>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a single system line
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(Speaker::System, prompt);
        history
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.utterances.push(Utterance::new(speaker, text));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Speaker::User, text);
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Speaker::Assistant, text);
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.utterances.last()
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Every utterance rendered and joined with newlines
    pub fn render(&self) -> String {
        self.utterances
            .iter()
            .map(Utterance::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
