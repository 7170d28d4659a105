//! Agent Host - builds prompts and drives chat turns
//!
//! This crate provides:
//! - Token counting and the live token meter
//! - The optimizer pass applied to every prompt
//! - The context assembler with its history trimming policy
//! - Session state that owns the history and the single live runner

pub mod assembler;
pub mod optimizer;
pub mod session;
pub mod token_counter;

pub use assembler::{context_header, trim_history, AssembledPrompt, ContextAssembler, TrimmedWindow};
pub use optimizer::{PassThrough, PromptOptimizer, SkillOptimizer};
pub use session::{Session, PREVIEW_CHARS, PREVIEW_CHUNKS};
pub use token_counter::{
    default_counter, BpeCounter, HeuristicCounter, MeterLevel, TokenCounter, TokenMeter,
};
