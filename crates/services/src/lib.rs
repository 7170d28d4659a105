//! Services - document retrieval for prompt context
//!
//! - Text extraction and chunking of local files
//! - Embedding (offline hashing or an Ollama server)
//! - A SQLite-backed vector store queried before every turn

pub mod chunker;
pub mod embedding_client;
pub mod file_extractor;
pub mod vector_store;

use anyhow::Result;
use shared::settings::{EmbedderKind, RetrievalSettings};
use std::path::Path;

pub use embedding_client::{Embedder, EmbeddingClient, HashingEmbedder, OllamaEmbedder};
pub use file_extractor::{extract_text, is_text_file};
pub use vector_store::{ChunkRecord, IngestStats, ScoredChunk, SqliteVectorStore, VectorStore};

/// Build the embedder named in settings
pub fn build_embedder(settings: &RetrievalSettings) -> Result<Box<dyn Embedder>> {
    Ok(match settings.embedder {
        EmbedderKind::Hashing => Box::new(HashingEmbedder::default()),
        EmbedderKind::Ollama => Box::new(OllamaEmbedder::new(
            &settings.ollama_url,
            &settings.embedding_model,
        )?),
    })
}

/// Open the on-disk vector store configured by `settings`
pub fn open_vector_store(settings: &RetrievalSettings, db_path: &Path) -> Result<SqliteVectorStore> {
    let embedder = build_embedder(settings)?;
    tracing::info!(
        "opening vector store at {} ({})",
        db_path.display(),
        embedder.model_name()
    );
    SqliteVectorStore::open(
        db_path,
        embedder,
        settings.chunk_size,
        settings.chunk_overlap,
    )
}
