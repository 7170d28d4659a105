//! Context Assembler
//!
//! Builds the bounded prompt for one turn out of:
//! - retrieved context chunks (always under a `SYSTEM:` context header)
//! - the chat history (verbatim in Answer mode, trimmed to a recent window
//!   in Assistant mode)
//! - the new user message and the mode's closing marker
//!
//! The draft then goes through the optimizer and is measured once more
//! against the token ceiling. A prompt over the ceiling is rejected so no
//! process is ever started for it.

use serde::Serialize;
use services::ScoredChunk;
use shared::agent_api::{PromptMode, SkillTag};
use shared::history::{ChatHistory, Speaker, Utterance};
use shared::settings::TokenBudget;
use shared::AssistantError;
use std::sync::Arc;

use crate::optimizer::PromptOptimizer;
use crate::token_counter::TokenCounter;

/// A prompt ready to hand to a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledPrompt {
    /// Prompt as drafted, before optimizing and stripping
    pub draft: String,
    /// Final text sent to the model
    pub text: String,
    /// Measured count of `text` including the fudge tokens
    pub token_count: usize,
    /// History utterances that made it into the prompt
    pub history_included: usize,
    pub mode: PromptMode,
}

/// Recent history that fits the trim limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedWindow {
    /// Oldest first
    pub utterances: Vec<Utterance>,
    /// Tokens of the kept utterances alone
    pub history_tokens: usize,
    /// Running total: the closing lines plus the kept utterances
    pub total_tokens: usize,
}

/// Header placed ahead of every prompt, with the retrieved text as its body
pub fn context_header(chunks: &[ScoredChunk]) -> String {
    let block = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("SYSTEM: Use the following context:\n{}\n\n", block)
}

/// Longest suffix of the non-assistant history that fits `trim_limit`.
///
/// Counting starts from the closing `USER:`/`ASSISTANT:` lines. Utterances
/// are taken newest first; the walk stops at the first one that would cross
/// the limit, so nothing older than a rejected utterance is ever kept.
pub fn trim_history(
    history: &ChatHistory,
    user_message: &str,
    counter: &dyn TokenCounter,
    trim_limit: usize,
) -> TrimmedWindow {
    let mut total = counter.count(&format!("USER: {}\nASSISTANT:", user_message));
    let mut history_tokens = 0;
    let mut kept: Vec<Utterance> = Vec::new();

    let candidates = history
        .utterances()
        .iter()
        .filter(|u| u.speaker != Speaker::Assistant);

    for utterance in candidates.rev() {
        let tokens = counter.count(&utterance.render());
        if total + tokens > trim_limit {
            break;
        }
        total += tokens;
        history_tokens += tokens;
        kept.push(utterance.clone());
    }
    kept.reverse();

    TrimmedWindow {
        utterances: kept,
        history_tokens,
        total_tokens: total,
    }
}

/// Prompt assembly with its collaborators
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
    optimizer: Box<dyn PromptOptimizer>,
    budget: TokenBudget,
}

impl ContextAssembler {
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        optimizer: Box<dyn PromptOptimizer>,
        budget: TokenBudget,
    ) -> Self {
        Self {
            counter,
            optimizer,
            budget,
        }
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Build the prompt for one turn. Deterministic for identical inputs.
    pub fn assemble(
        &self,
        history: &ChatHistory,
        user_message: &str,
        mode: PromptMode,
        skill: SkillTag,
        chunks: &[ScoredChunk],
    ) -> Result<AssembledPrompt, AssistantError> {
        let prompt = self.prepare(history, user_message, mode, skill, chunks)?;
        self.enforce_ceiling(prompt.token_count)?;
        Ok(prompt)
    }

    /// Draft, optimize and measure without rejecting long prompts
    pub fn prepare(
        &self,
        history: &ChatHistory,
        user_message: &str,
        mode: PromptMode,
        skill: SkillTag,
        chunks: &[ScoredChunk],
    ) -> Result<AssembledPrompt, AssistantError> {
        if user_message.trim().is_empty() {
            return Err(AssistantError::EmptyMessage);
        }

        let header = context_header(chunks);
        let (draft, history_included) = match mode {
            PromptMode::Answer => (
                format!(
                    "{}{}\nUSER: {}\nASSISTANT: Answer:\n",
                    header,
                    history.render(),
                    user_message
                ),
                history.len(),
            ),
            PromptMode::Assistant => {
                let window = trim_history(
                    history,
                    user_message,
                    self.counter.as_ref(),
                    self.budget.trim_limit(),
                );
                let included = window.utterances.len();
                let mut lines: Vec<String> =
                    window.utterances.iter().map(Utterance::render).collect();
                lines.push(format!("USER: {}", user_message));
                lines.push("ASSISTANT:".to_string());
                (format!("{}{}", header, lines.join("\n")), included)
            }
        };

        let optimized = self
            .optimizer
            .optimize(draft.trim(), mode, user_message, skill);
        let text = optimized.trim().to_string();

        let token_count = self.counter.count(&text) + self.budget.fudge_tokens;
        tracing::debug!(
            "assembled {} prompt: {} tokens, {} history utterances",
            mode,
            token_count,
            history_included
        );

        Ok(AssembledPrompt {
            draft,
            text,
            token_count,
            history_included,
            mode,
        })
    }

    /// Measured count of a prompt that skipped assembly, fudge included
    pub fn measure(&self, text: &str) -> usize {
        self.counter.count(text.trim()) + self.budget.fudge_tokens
    }

    pub fn enforce_ceiling(&self, token_count: usize) -> Result<(), AssistantError> {
        if token_count > self.budget.ceiling {
            return Err(AssistantError::OverLength {
                token_count,
                ceiling: self.budget.ceiling,
            });
        }
        Ok(())
    }
}
