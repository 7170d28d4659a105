pub mod error;
pub mod events;
pub mod history;

pub use error::AssistantError;

pub mod settings {
    use crate::agent_api::{PromptMode, SkillTag};
    use serde::{Deserialize, Serialize};

    /// How `llama-cli` is launched for every turn.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(default)]
    pub struct InferenceSettings {
        pub executable: String,
        pub model_path: String,
        pub threads: u32,
        pub gpu_layers: u32,
        pub n_predict: u32,
        /// Passed as `--reverse-prompt` so the model stops before inventing the next user turn
        pub reverse_prompt: String,
    }

    impl Default for InferenceSettings {
        fn default() -> Self {
            Self {
                executable: "llama-cli".into(),
                model_path: "models/llama-2-13b-chat.Q4_K_M.gguf".into(),
                threads: 16,
                gpu_layers: 99,
                n_predict: 1024,
                reverse_prompt: "USER:".into(),
            }
        }
    }

    /// Token ceiling for the final prompt plus the margin kept back while trimming history.
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(default)]
    pub struct TokenBudget {
        pub ceiling: usize,
        pub reserved_for_optimizer: usize,
        /// Added to the measured count to cover the model's own leading token
        pub fudge_tokens: usize,
    }

    impl TokenBudget {
        pub fn new(ceiling: usize, reserved_for_optimizer: usize) -> Self {
            Self {
                ceiling,
                reserved_for_optimizer,
                fudge_tokens: 1,
            }
        }

        pub fn trim_limit(&self) -> usize {
            self.ceiling.saturating_sub(self.reserved_for_optimizer)
        }

        /// Input above this many tokens is flagged before it is sent
        pub fn warning_tokens(&self) -> usize {
            (self.ceiling as f64 * 0.8) as usize
        }
    }

    impl Default for TokenBudget {
        fn default() -> Self {
            Self::new(3800, 512)
        }
    }

    /// Markers used to pick the model's answer out of `llama-cli` output.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(default)]
    pub struct StreamSettings {
        pub answer_markers: Vec<String>,
        pub end_marker: String,
        /// Lines containing any of these are loader noise and never reach the transcript
        pub banner_patterns: Vec<String>,
        /// `llama-cli` prints the prompt back before answering
        pub prompt_echo: bool,
    }

    impl Default for StreamSettings {
        fn default() -> Self {
            Self {
                answer_markers: vec!["Answer:".into(), "ASSISTANT:".into()],
                end_marker: "[end of text]".into(),
                banner_patterns: vec!["llama_model_loader".into(), "llama_tokenizer".into()],
                prompt_echo: true,
            }
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum EmbedderKind {
        /// Offline feature-hashing embedder, no external service required
        Hashing,
        /// Ollama `/api/embeddings`
        Ollama,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(default)]
    pub struct RetrievalSettings {
        pub top_k: usize,
        pub embedder: EmbedderKind,
        pub ollama_url: String,
        pub embedding_model: String,
        /// Words per chunk
        pub chunk_size: usize,
        pub chunk_overlap: usize,
    }

    impl Default for RetrievalSettings {
        fn default() -> Self {
            Self {
                top_k: 5,
                embedder: EmbedderKind::Hashing,
                ollama_url: "http://localhost:11434".into(),
                embedding_model: "nomic-embed-text".into(),
                chunk_size: 200,
                chunk_overlap: 40,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        #[serde(default)]
        pub inference: InferenceSettings,
        #[serde(default)]
        pub budget: TokenBudget,
        #[serde(default)]
        pub stream: StreamSettings,
        #[serde(default)]
        pub retrieval: RetrievalSettings,
        #[serde(default = "default_system_prompt")]
        pub system_prompt: String,
        #[serde(default = "default_debug_prompt_path")]
        pub debug_prompt_path: String,
        #[serde(default)]
        pub default_mode: PromptMode,
        #[serde(default)]
        pub default_skill: SkillTag,
    }

    fn default_system_prompt() -> String {
        "You are a helpful assistant.".into()
    }

    fn default_debug_prompt_path() -> String {
        "last_prompt_debug.txt".into()
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                inference: InferenceSettings::default(),
                budget: TokenBudget::default(),
                stream: StreamSettings::default(),
                retrieval: RetrievalSettings::default(),
                system_prompt: default_system_prompt(),
                debug_prompt_path: default_debug_prompt_path(),
                default_mode: PromptMode::default(),
                default_skill: SkillTag::default(),
            }
        }
    }

}

pub mod agent_api {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;

    /// Assembly strategy chosen before each turn
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
    pub enum PromptMode {
        /// Whole history plus an `ASSISTANT: Answer:` cue, no trimming
        #[default]
        Answer,
        /// Budget-trimmed history without earlier assistant turns
        Assistant,
    }

    impl PromptMode {
        pub fn all() -> &'static [PromptMode] {
            &[PromptMode::Answer, PromptMode::Assistant]
        }

        pub fn display_name(&self) -> &'static str {
            match self {
                PromptMode::Answer => "Answer",
                PromptMode::Assistant => "Assistant",
            }
        }
    }

    impl fmt::Display for PromptMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.display_name())
        }
    }

    impl FromStr for PromptMode {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "answer" => Ok(PromptMode::Answer),
                "assistant" => Ok(PromptMode::Assistant),
                other => Err(format!("unknown prompt mode '{}'", other)),
            }
        }
    }

    /// Domain hint forwarded to the prompt optimizer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
    pub enum SkillTag {
        #[default]
        General,
        Python,
        RaspberryPi,
        Sql,
        Json,
    }

    impl SkillTag {
        pub fn all() -> &'static [SkillTag] {
            &[
                SkillTag::General,
                SkillTag::Python,
                SkillTag::RaspberryPi,
                SkillTag::Sql,
                SkillTag::Json,
            ]
        }

        pub fn display_name(&self) -> &'static str {
            match self {
                SkillTag::General => "General",
                SkillTag::Python => "Python",
                SkillTag::RaspberryPi => "Raspberry Pi",
                SkillTag::Sql => "SQL",
                SkillTag::Json => "JSON",
            }
        }
    }

    impl fmt::Display for SkillTag {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.display_name())
        }
    }

    impl FromStr for SkillTag {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let key: String = s
                .trim()
                .to_ascii_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            match key.as_str() {
                "general" => Ok(SkillTag::General),
                "python" | "py" => Ok(SkillTag::Python),
                "raspberrypi" | "rpi" | "pi" => Ok(SkillTag::RaspberryPi),
                "sql" => Ok(SkillTag::Sql),
                "json" => Ok(SkillTag::Json),
                _ => Err(format!("unknown skill '{}'", s.trim())),
            }
        }
    }

}
