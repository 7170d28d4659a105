//! Token counting used for history trimming and the prompt ceiling check.

use anyhow::Result;
use serde::Serialize;
use shared::settings::TokenBudget;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Pure, deterministic text -> token count
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Approximate count: one token per four characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Byte-pair-encoding count with the cl100k vocabulary.
pub struct BpeCounter {
    bpe: CoreBPE,
}

impl BpeCounter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// The BPE counter when its vocabulary loads, the heuristic otherwise
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match BpeCounter::new() {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            tracing::warn!("BPE tokenizer unavailable, estimating tokens: {}", e);
            Arc::new(HeuristicCounter)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MeterLevel {
    Ok,
    /// Above 80% of the ceiling
    Warning,
    Over,
}

/// Live count for text the user is still typing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenMeter {
    pub count: usize,
    pub ceiling: usize,
    pub level: MeterLevel,
}

impl TokenMeter {
    pub fn measure(counter: &dyn TokenCounter, text: &str, budget: &TokenBudget) -> Self {
        let count = counter.count(text);
        let level = if count > budget.ceiling {
            MeterLevel::Over
        } else if count > budget.warning_tokens() {
            MeterLevel::Warning
        } else {
            MeterLevel::Ok
        };
        Self {
            count,
            ceiling: budget.ceiling,
            level,
        }
    }
}

impl std::fmt::Display for TokenMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            MeterLevel::Over => write!(f, "Tokens: {} (over limit of {})", self.count, self.ceiling),
            _ => write!(f, "Tokens: {} / {}", self.count, self.ceiling),
        }
    }
}
