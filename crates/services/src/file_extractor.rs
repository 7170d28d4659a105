//! Plain-text extraction for files loaded into a prompt or the vector store.

use anyhow::{Context, Result};
use std::path::Path;

/// Extensions treated as text when walking a folder
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "csv", "tsv", "json", "toml", "yaml", "yml", "ini",
    "cfg", "conf", "xml", "html", "htm", "sql", "py", "rs", "js", "ts", "sh", "c", "h", "cpp",
    "hpp", "java", "go", "rb",
];

pub fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read a file as text. UTF-8 first, Latin-1 for anything that is not valid
/// UTF-8. HTML is reduced to its readable text.
pub fn extract_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;

    let is_html = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false);
    if is_html {
        return Ok(html2text::from_read(&bytes[..], 100));
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("{} is not UTF-8, decoding as Latin-1", path.display());
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };
    Ok(text.trim_start_matches('\u{FEFF}').to_string())
}
