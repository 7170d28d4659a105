//! Text embedders for the vector store: an offline hashing embedder and an
//! HTTP client for Ollama's `/api/embeddings` endpoint.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Turns text into a fixed-length vector. Implementations must be deterministic
/// for a given model so stored and query vectors are comparable.
pub trait Embedder: Send + Sync {
    /// Stored next to every vector; rows from another model are ignored at query time
    fn model_name(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Feature-hashing bag of words. Needs no service and is stable across runs.
pub struct HashingEmbedder {
    dims: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(8);
        Self {
            dims,
            name: format!("hashing-{}", dims),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(raw);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((value % self.dims as u64) as usize, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        for word in &words {
            let (idx, sign) = self.bucket(word);
            vector[idx] += sign;
        }
        // Bigrams give some weight to word order
        for pair in words.windows(2) {
            let (idx, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[idx] += 0.5 * sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(1)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Check if the embedding service is available.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.http.get(&url).send().await.is_ok()
    }

    /// Embed a single text string.
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let req = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| anyhow!("embedding request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let cut = body
                .char_indices()
                .nth(300)
                .map(|(i, _)| i)
                .unwrap_or(body.len());
            return Err(anyhow!("embedding error {}: {}", status, &body[..cut]));
        }

        let body: EmbedResponse = resp.json().await?;
        if body.embedding.is_empty() {
            return Err(anyhow!("empty embedding returned"));
        }
        Ok(body.embedding)
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Blocking adapter so the synchronous vector store can use the async client.
pub struct OllamaEmbedder {
    client: EmbeddingClient,
    runtime: tokio::runtime::Runtime,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start embedding runtime")?;
        Ok(Self {
            client: EmbeddingClient::new(base_url, model)?,
            runtime,
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        self.client.model_name()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.runtime.block_on(self.client.embed_single(text))
    }
}
