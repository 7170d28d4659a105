//! Final rewrite pass applied to every assembled prompt.

use regex::Regex;
use shared::agent_api::{PromptMode, SkillTag};

/// Rewrites a drafted prompt before it is counted and sent
pub trait PromptOptimizer: Send + Sync {
    fn optimize(&self, prompt: &str, mode: PromptMode, user_message: &str, skill: SkillTag)
        -> String;
}

/// Leaves the prompt untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl PromptOptimizer for PassThrough {
    fn optimize(&self, prompt: &str, _: PromptMode, _: &str, _: SkillTag) -> String {
        prompt.to_string()
    }
}

const SKILL_KEYWORDS: &[(SkillTag, &str)] = &[
    (
        SkillTag::Python,
        r"(?i)\b(python|pip|pandas|numpy|django|flask|pytest|venv|def)\b|\.py\b",
    ),
    (
        SkillTag::RaspberryPi,
        r"(?i)\b(raspberry|raspbian|gpio|rpi|pi\s?[345]|pico)\b",
    ),
    (
        SkillTag::Sql,
        r"(?i)\b(sql|sqlite|postgres(ql)?|mysql|select|insert|join|schema|query)\b",
    ),
    (SkillTag::Json, r"(?i)\b(json|jq|jsonl|schema\.json)\b"),
];

/// Prepends a skill-specific instruction and tidies whitespace.
///
/// With [`SkillTag::General`] the skill is guessed from keywords in the user
/// message; the first matching skill wins.
pub struct SkillOptimizer {
    keywords: Vec<(SkillTag, Regex)>,
    blank_runs: Option<Regex>,
}

impl SkillOptimizer {
    pub fn new() -> Self {
        let keywords = SKILL_KEYWORDS
            .iter()
            .filter_map(|(skill, pattern)| Regex::new(pattern).ok().map(|re| (*skill, re)))
            .collect();
        Self {
            keywords,
            blank_runs: Regex::new(r"\n{3,}").ok(),
        }
    }

    /// Skill that applies to this message
    pub fn resolve_skill(&self, user_message: &str, skill: SkillTag) -> SkillTag {
        if skill != SkillTag::General {
            return skill;
        }
        self.keywords
            .iter()
            .find(|(_, re)| re.is_match(user_message))
            .map(|(skill, _)| *skill)
            .unwrap_or(SkillTag::General)
    }

    fn skill_line(skill: SkillTag, mode: PromptMode) -> Option<String> {
        let focus = match skill {
            SkillTag::General => return None,
            SkillTag::Python => "You are an expert Python developer. Prefer idiomatic, runnable code",
            SkillTag::RaspberryPi => {
                "You are an expert in Raspberry Pi hardware and Linux. Mention pin numbers and commands explicitly"
            }
            SkillTag::Sql => "You are an expert in SQL. Write standard queries and explain joins",
            SkillTag::Json => "You are an expert in JSON. Always return valid JSON when asked for data",
        };
        let style = match mode {
            PromptMode::Answer => "Answer directly.",
            PromptMode::Assistant => "Keep the conversation going.",
        };
        Some(format!("SYSTEM: {}. {}", focus, style))
    }

    fn tidy(&self, prompt: &str) -> String {
        let trimmed: Vec<&str> = prompt.lines().map(str::trim_end).collect();
        let joined = trimmed.join("\n");
        match &self.blank_runs {
            Some(re) => re.replace_all(&joined, "\n\n").into_owned(),
            None => joined,
        }
    }
}

impl Default for SkillOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptOptimizer for SkillOptimizer {
    fn optimize(
        &self,
        prompt: &str,
        mode: PromptMode,
        user_message: &str,
        skill: SkillTag,
    ) -> String {
        let skill = self.resolve_skill(user_message, skill);
        let body = self.tidy(prompt);
        match Self::skill_line(skill, mode) {
            Some(line) => {
                tracing::debug!("optimizer applied skill {}", skill);
                format!("{}\n{}", line, body)
            }
            None => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_keyword_patterns_compile() {
        assert_eq!(SkillOptimizer::new().keywords.len(), SKILL_KEYWORDS.len());
        assert!(SkillOptimizer::new().blank_runs.is_some());
    }

    #[test]
    fn test_resolve_skill_from_keywords() {
        let opt = SkillOptimizer::new();
        assert_eq!(
            opt.resolve_skill("how do I pip install requests", SkillTag::General),
            SkillTag::Python
        );
        assert_eq!(
            opt.resolve_skill("blink an LED on GPIO 17", SkillTag::General),
            SkillTag::RaspberryPi
        );
        assert_eq!(
            opt.resolve_skill("SELECT the newest rows", SkillTag::General),
            SkillTag::Sql
        );
        assert_eq!(
            opt.resolve_skill("pretty print this JSON", SkillTag::General),
            SkillTag::Json
        );
        assert_eq!(
            opt.resolve_skill("tell me a joke", SkillTag::General),
            SkillTag::General
        );
        // An explicit choice is never overridden
        assert_eq!(
            opt.resolve_skill("pretty print this JSON", SkillTag::Sql),
            SkillTag::Sql
        );
    }

    #[test]
    fn test_general_prompt_only_tidied() {
        let opt = SkillOptimizer::new();
        let out = opt.optimize(
            "SYSTEM: hi   \n\n\n\nUSER: tell me a joke\nASSISTANT:",
            PromptMode::Assistant,
            "tell me a joke",
            SkillTag::General,
        );
        assert_eq!(out, "SYSTEM: hi\n\nUSER: tell me a joke\nASSISTANT:");
    }

    #[test]
    fn test_skill_line_prepended() {
        let opt = SkillOptimizer::new();
        let out = opt.optimize(
            "USER: write a loop\nASSISTANT: Answer:",
            PromptMode::Answer,
            "write a loop",
            SkillTag::Python,
        );
        let first = out.lines().next().unwrap();
        assert!(first.starts_with("SYSTEM: You are an expert Python developer"));
        assert!(first.ends_with("Answer directly."));
        assert!(out.ends_with("ASSISTANT: Answer:"));
    }

    #[test]
    fn test_pass_through() {
        let out = PassThrough.optimize(" x \n", PromptMode::Answer, "x", SkillTag::Json);
        assert_eq!(out, " x \n");
    }
}
