//! Chunk store backing retrieval-augmented prompts.
//!
//! Documents are split into chunks, embedded, and kept in SQLite next to their
//! vectors. Queries embed the question and rank stored chunks by cosine
//! similarity.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;

use crate::chunker::chunk_text;
use crate::embedding_client::Embedder;
use crate::file_extractor::{extract_text, is_text_file};

/// A retrieved chunk, best match first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// 1-based position in the result list
    pub rank: usize,
    pub text: String,
    pub score: f64,
    pub source: String,
}

/// A stored chunk as listed by [`VectorStore::all_chunks`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

/// Statistics from an ingest call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    pub chunks: usize,
    /// Unchanged since the last ingest
    pub unchanged: usize,
    pub errors: usize,
}

/// Retrieval backend consulted before every turn.
pub trait VectorStore: Send + Sync {
    fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredChunk>>;
    fn ingest_file(&self, path: &Path) -> Result<IngestStats>;
    fn ingest_folder(&self, path: &Path) -> Result<IngestStats>;
    fn all_chunks(&self) -> Result<Vec<ChunkRecord>>;
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Box<dyn Embedder>,
    chunk_size: usize,
    chunk_overlap: usize,
    db_path: Option<PathBuf>,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `db_path`
    pub fn open(
        db_path: &Path,
        embedder: Box<dyn Embedder>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            chunk_size,
            chunk_overlap,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Store that lives only as long as this value
    pub fn in_memory(
        embedder: Box<dyn Embedder>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            chunk_size,
            chunk_overlap,
            db_path: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                model_name TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                ingested_at INTEGER NOT NULL,
                UNIQUE(source, chunk_index)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.execute("DELETE FROM chunks", [])?;
        Ok(())
    }

    fn stored_hash(&self, source: &str) -> Result<Option<(String, String)>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT content_hash, model_name FROM chunks WHERE source = ?1 LIMIT 1",
            params![source],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );
        match result {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl VectorStore for SqliteVectorStore {
    fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(text)?;

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source, text, embedding FROM chunks WHERE model_name = ?1 ORDER BY id",
        )?;
        let mut scored: Vec<(f64, i64, String, String)> = stmt
            .query_map(params![self.embedder.model_name()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, source, text, blob)| {
                let sim = cosine_similarity(&query_embedding, &decode_embedding(&blob));
                (sim, id, source, text)
            })
            .collect();

        // Ties fall back to insertion order so results are stable
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, _, source, text))| ScoredChunk {
                rank: i + 1,
                text,
                score,
                source,
            })
            .collect())
    }

    fn ingest_file(&self, path: &Path) -> Result<IngestStats> {
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        let source = path.to_string_lossy().to_string();
        let text = extract_text(path)?;
        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

        if let Some((stored, model)) = self.stored_hash(&source)? {
            if stored == hash && model == self.embedder.model_name() {
                tracing::debug!("{} unchanged, skipping", source);
                return Ok(IngestStats {
                    files: 1,
                    unchanged: 1,
                    ..Default::default()
                });
            }
        }

        // Embed everything before touching the table so a failure leaves the old rows intact
        let chunks = chunk_text(&text, self.chunk_size, self.chunk_overlap);
        let mut embedded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk)?;
            embedded.push((chunk, vector));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
        let now = Utc::now().timestamp();
        for (index, (chunk, vector)) in embedded.iter().enumerate() {
            let blob: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
            tx.execute(
                "INSERT INTO chunks (source, chunk_index, text, embedding, model_name, content_hash, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    source,
                    index as i64,
                    chunk,
                    blob,
                    self.embedder.model_name(),
                    hash,
                    now
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!("vectorized {} ({} chunks)", source, embedded.len());
        Ok(IngestStats {
            files: 1,
            chunks: embedded.len(),
            ..Default::default()
        })
    }

    fn ingest_folder(&self, path: &Path) -> Result<IngestStats> {
        if !path.is_dir() {
            bail!("{} is not a folder", path.display());
        }
        let mut stats = IngestStats::default();

        let walker = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !is_text_file(entry.path()) {
                continue;
            }
            match self.ingest_file(entry.path()) {
                Ok(file_stats) => {
                    stats.files += file_stats.files;
                    stats.chunks += file_stats.chunks;
                    stats.unchanged += file_stats.unchanged;
                }
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", entry.path().display(), e);
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    fn all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source, chunk_index, text, ingested_at FROM chunks ORDER BY source, chunk_index",
        )?;
        let records = stmt
            .query_map([], |row| {
                let ingested: i64 = row.get(4)?;
                Ok(ChunkRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    chunk_index: row.get::<_, i64>(2)? as usize,
                    text: row.get(3)?,
                    ingested_at: Utc
                        .timestamp_opt(ingested, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}

/// Cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let fa = *x as f64;
        let fb = *y as f64;
        dot += fa * fb;
        norm_a += fa * fa;
        norm_b += fb * fb;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Decode a BLOB of little-endian f32 values.
fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Check if a directory entry is hidden (starts with .)
fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
