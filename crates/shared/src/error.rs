//! User-facing failures of a chat turn or a collaborator operation.

/// Errors the front-end reports to the user. None of them are fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Prompt too long: {token_count} tokens, model limit is {ceiling}")]
    OverLength { token_count: usize, ceiling: usize },

    #[error("Failed to launch {executable}: {message}")]
    ProcessLaunch { executable: String, message: String },

    #[error("Error with {name}: {message}")]
    FileAccess { name: String, message: String },

    #[error("Vector store unavailable: {0}")]
    Retrieval(String),
}

impl AssistantError {
    /// Build a `FileAccess` error naming only the file, not its full path
    pub fn file_access(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        AssistantError::FileAccess {
            name,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_file_access_uses_file_name() {
        let err = AssistantError::file_access(Path::new("/tmp/notes/report.txt"), "permission denied");
        assert_eq!(err.to_string(), "Error with report.txt: permission denied");
    }

    #[test]
    fn test_over_length_message() {
        let err = AssistantError::OverLength {
            token_count: 4001,
            ceiling: 3800,
        };
        assert!(err.to_string().contains("4001"));
        assert!(err.to_string().contains("3800"));
    }
}
