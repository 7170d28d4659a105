//! Inference providers: launching llama.cpp and reading its answer back.

pub mod llama_cli;
pub mod stream;

pub use llama_cli::{InferenceRunner, LlamaCliRunner, RunnerHandle, RunnerState};
pub use stream::{clean_reply, pump, LineOutcome, PumpSummary, ResponseScanner, ScanState};
