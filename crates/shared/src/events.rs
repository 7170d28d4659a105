//! Event types flowing from the inference worker to the session, and from
//! the session to whatever front-end drives it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::agent_api::PromptMode;
use crate::error::AssistantError;

/// Emitted by a runner's worker thread, in the order lines were produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerEvent {
    /// One line of the model's answer, trailing newline included
    Fragment(String),
    /// Blank separator sent once the process has exited
    Separator,
    /// The executable could not be started; no fragments follow
    LaunchFailed { executable: String, message: String },
    /// Last event of every run
    Exited {
        code: Option<i32>,
        saw_end_marker: bool,
    },
}

/// Informational or error notices for the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    PromptTooLong { token_count: usize, ceiling: usize },
    LaunchFailed { message: String },
    NoResponse,
    FileLoaded { name: String },
    FileVectorized { name: String, chunks: usize },
    FolderVectorized { name: String, chunks: usize },
    NoChunks,
    Error { message: String },
}

impl Notice {
    /// Whether the notice reports a failure rather than plain information
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::PromptTooLong { .. } | Notice::LaunchFailed { .. } | Notice::Error { .. }
        )
    }
}

impl From<&AssistantError> for Notice {
    fn from(err: &AssistantError) -> Self {
        match err {
            AssistantError::OverLength {
                token_count,
                ceiling,
            } => Notice::PromptTooLong {
                token_count: *token_count,
                ceiling: *ceiling,
            },
            AssistantError::ProcessLaunch { .. } => Notice::LaunchFailed {
                message: err.to_string(),
            },
            other => Notice::Error {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PromptTooLong {
                token_count,
                ceiling,
            } => write!(
                f,
                "[⛔ Prompt too long: {} tokens - model limit is {}]",
                token_count, ceiling
            ),
            Notice::LaunchFailed { message } => write!(f, "[❌ {}]", message),
            Notice::NoResponse => write!(f, "[Notice: No response from model.]"),
            Notice::FileLoaded { name } => write!(f, "[📂 Loaded file: {}]", name),
            Notice::FileVectorized { name, chunks } => {
                write!(f, "[✅ File vectorized: {} ({} chunks)]", name, chunks)
            }
            Notice::FolderVectorized { name, chunks } => {
                write!(f, "[✅ Folder vectorized: {} ({} chunks)]", name, chunks)
            }
            Notice::NoChunks => write!(f, "[ℹ️ No vector chunks loaded]"),
            Notice::Error { message } => write!(f, "[❌ {}]", message),
        }
    }
}

/// What the session reports back to its driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionUpdate {
    Fragment(String),
    Notice(Notice),
    /// The turn is over; `response` is what went into the history (empty if nothing did)
    Completed {
        turn_id: Uuid,
        mode: PromptMode,
        response: String,
    },
}
