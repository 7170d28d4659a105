use shared::settings::{AppSettings, EmbedderKind};
use std::path::{Path, PathBuf};

/// Overrides `inference.executable`
pub const ENV_LLAMA_CLI: &str = "LLAMA_CLI_PATH";
/// Overrides `inference.model_path`
pub const ENV_MODEL: &str = "LLAMA_MODEL_PATH";
/// Overrides `retrieval.ollama_url` and switches retrieval to Ollama embeddings
pub const ENV_OLLAMA: &str = "OLLAMA_BASE_URL";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "LLaMA Assistant", "LlamaAssistant")
}

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|proj| proj.config_dir().join("settings.json"))
}

/// Location of the vector database
pub fn vector_db_path() -> PathBuf {
    project_dirs()
        .map(|proj| proj.data_dir().join("vectors.db"))
        .unwrap_or_else(|| PathBuf::from("./vectors.db"))
}

/// Expand a path string that may start with ~ to the full home directory path
pub fn expand_user_path(path_str: &str) -> PathBuf {
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(stripped);
        }
    }
    PathBuf::from(path_str)
}

/// Read settings from `path`. `None` when missing or unreadable.
pub fn read_settings(path: &Path) -> Option<AppSettings> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<AppSettings>(&contents) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!("ignoring unreadable settings {}: {}", path.display(), e);
            None
        }
    }
}

/// Apply environment overrides; `lookup` is `std::env::var` outside tests
pub fn apply_env_overrides(settings: &mut AppSettings, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(exe) = non_empty(ENV_LLAMA_CLI) {
        settings.inference.executable = exe;
    }
    if let Some(model) = non_empty(ENV_MODEL) {
        settings.inference.model_path = model;
    }
    if let Some(url) = non_empty(ENV_OLLAMA) {
        settings.retrieval.ollama_url = url;
        settings.retrieval.embedder = EmbedderKind::Ollama;
    }
}

/// Load settings from disk or return defaults, then apply the environment.
/// The flag tells whether a settings file was found.
pub fn load_settings_or_default() -> (AppSettings, bool) {
    let stored = config_path().and_then(|path| read_settings(&path));
    let found = stored.is_some();
    let mut settings = stored.unwrap_or_default();
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    (settings, found)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) {
    if let Some(path) = config_path() {
        if let Err(e) = write_settings(&path, settings) {
            tracing::warn!("could not save settings to {}: {:#}", path.display(), e);
        }
    }
}

pub fn write_settings(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LLAMA_CLI, "/opt/llama/llama-cli"),
            (ENV_MODEL, "/models/llama-2-13b-chat.Q4_K_M.gguf"),
            (ENV_OLLAMA, "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();

        let mut settings = AppSettings::default();
        apply_env_overrides(&mut settings, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.inference.executable, "/opt/llama/llama-cli");
        assert_eq!(
            settings.inference.model_path,
            "/models/llama-2-13b-chat.Q4_K_M.gguf"
        );
        assert_eq!(settings.retrieval.ollama_url, "http://gpu-box:11434");
        assert_eq!(settings.retrieval.embedder, EmbedderKind::Ollama);
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut settings = AppSettings::default();
        apply_env_overrides(&mut settings, |_| Some("   ".to_string()));

        assert_eq!(settings.inference.executable, "llama-cli");
        assert_eq!(settings.retrieval.embedder, EmbedderKind::Hashing);
    }

    #[test]
    fn test_settings_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = AppSettings::default();
        settings.inference.threads = 4;

        write_settings(&path, &settings).unwrap();
        let loaded = read_settings(&path).unwrap();
        assert_eq!(loaded.inference.threads, 4);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_settings(&path).is_none());
        assert!(read_settings(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn test_expand_user_path() {
        assert_eq!(expand_user_path("/tmp/x"), PathBuf::from("/tmp/x"));
        let expanded = expand_user_path("~/notes.txt");
        assert!(expanded.ends_with("notes.txt"));
    }
}
