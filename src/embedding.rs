//! Embedding client abstraction, the Ollama implementation, and the
//! content-addressed embedding gateway.
//!
//! Also provides the vector utilities the store layer shares:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codec
//! - [`content_hash`] — sha256 hex digest used as the cache key
//!
//! # Degradation contract
//!
//! Document embedding degrades per text: a failed call yields a zero
//! vector of the configured dimensionality, logged but not fatal, so one
//! flaky request never fails a whole document. If *every* text in a
//! non-empty batch fails the service is considered down and the batch
//! returns [`CoreError::EmbeddingUnavailable`]. Query embedding never
//! zero-fills; a zero query vector would silently retrieve noise.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::CoreError;
use crate::store::Store;

/// A backend that turns one text into one vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier, part of the cache key.
    fn model_name(&self) -> &str;
    /// Vector dimensionality this client produces.
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embedding client for an Ollama server.
///
/// Calls `POST {host}/api/embeddings` with `{model, prompt}` and a
/// bounded per-call timeout.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    host: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building embedding HTTP client")?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.host))
            .json(&body)
            .send()
            .await
            .context("calling embedding service")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embedding service error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("decoding embedding response")?;
        let raw = json
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("embedding response missing 'embedding' array"))?;

        let vec: Vec<f32> = raw
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vec.len() != self.dims {
            return Err(anyhow::Error::new(CoreError::DimensionMismatch {
                expected: self.dims,
                actual: vec.len(),
            }));
        }
        Ok(vec)
    }
}

/// Content-addressed embedding front: consults the persistent cache
/// before calling the client, and writes fresh vectors back best-effort.
///
/// Cache entries are keyed by `(model, sha256(content))`, so switching
/// models never replays another model's vectors.
pub struct EmbeddingGateway {
    client: Arc<dyn EmbeddingClient>,
    store: Arc<dyn Store>,
}

impl EmbeddingGateway {
    pub fn new(client: Arc<dyn EmbeddingClient>, store: Arc<dyn Store>) -> Self {
        Self { client, store }
    }

    pub fn dims(&self) -> usize {
        self.client.dims()
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Embed a batch of document texts, order preserving.
    ///
    /// Per-text failures degrade to zero vectors. Errors only when every
    /// text in a non-empty batch fails.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.client.model_name().to_string();
        let dims = self.client.dims();
        let mut vectors = Vec::with_capacity(texts.len());
        let mut failures = 0usize;

        for text in texts {
            let hash = content_hash(text);

            match self.store.cache_get(&model, &hash).await {
                Ok(Some(cached)) if cached.len() == dims => {
                    vectors.push(cached);
                    continue;
                }
                Ok(Some(cached)) => {
                    warn!(
                        expected = dims,
                        actual = cached.len(),
                        "ignoring cached embedding with wrong dimensionality"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "embedding cache lookup failed; embedding fresh");
                }
            }

            match self.client.embed(text).await {
                Ok(vec) => {
                    if let Err(e) = self.store.cache_put(&model, &hash, &vec).await {
                        warn!(error = %e, "embedding cache write failed; continuing");
                    }
                    vectors.push(vec);
                }
                Err(e) => {
                    warn!(error = %e, "embedding failed; substituting zero vector");
                    failures += 1;
                    vectors.push(vec![0.0; dims]);
                }
            }
        }

        if !texts.is_empty() && failures == texts.len() {
            return Err(anyhow::Error::new(CoreError::EmbeddingUnavailable));
        }
        Ok(vectors)
    }

    /// Embed a query text. Cached like document text, but failures are
    /// errors rather than zero vectors.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.client.model_name().to_string();
        let hash = content_hash(text);

        match self.store.cache_get(&model, &hash).await {
            Ok(Some(cached)) if cached.len() == self.client.dims() => return Ok(cached),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "embedding cache lookup failed; embedding fresh");
            }
        }

        let vec = self.client.embed(text).await?;
        if let Err(e) = self.store.cache_put(&model, &hash, &vec).await {
            warn!(error = %e, "embedding cache write failed; continuing");
        }
        Ok(vec)
    }
}

/// Sha256 hex digest of the text, the cache key component.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors,
/// mismatched lengths, or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
