//! TOML configuration with serde defaults and load-time validation.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub target_size: usize,
    /// Bytes carried over between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    /// Candidates fetched from each search before fusion and reranking.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Trigram similarity below this never ranks, matching the pg_trgm
    /// default threshold.
    #[serde(default = "default_keyword_floor")]
    pub keyword_floor: f64,
    /// "none", "similarity", or "llm". Unknown values fall back to none.
    #[serde(default = "default_rerank_strategy")]
    pub rerank_strategy: String,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    /// Chunks assembled into the generation context.
    #[serde(default = "default_context_chunks")]
    pub context_chunks: usize,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            candidate_limit: default_candidate_limit(),
            keyword_floor: default_keyword_floor(),
            rerank_strategy: default_rerank_strategy(),
            rerank_top_n: default_rerank_top_n(),
            context_chunks: default_context_chunks(),
            context_max_chars: default_context_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector dimensionality; every stored and queried vector must match.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_embedding_model(),
            dims: default_dims(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_generation_model(),
            timeout_secs: default_generate_timeout_secs(),
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            num_ctx: default_num_ctx(),
            top_k: default_top_k(),
            top_p: default_top_p(),
        }
    }
}

fn default_db_path() -> String {
    "docqa.db".to_string()
}

fn default_chunk_size() -> usize {
    768
}

fn default_chunk_overlap() -> usize {
    75
}

fn default_vector_weight() -> f64 {
    0.7
}

fn default_keyword_weight() -> f64 {
    0.3
}

fn default_candidate_limit() -> usize {
    20
}

fn default_keyword_floor() -> f64 {
    0.3
}

fn default_rerank_strategy() -> String {
    "none".to_string()
}

fn default_rerank_top_n() -> usize {
    10
}

fn default_context_chunks() -> usize {
    5
}

fn default_context_max_chars() -> usize {
    2500
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dims() -> usize {
    768
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}

fn default_generate_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f64 {
    0.0
}

fn default_num_predict() -> u32 {
    300
}

fn default_num_ctx() -> u32 {
    1024
}

fn default_top_k() -> u32 {
    40
}

fn default_top_p() -> f64 {
    0.9
}

/// Load and validate a config file. Missing file is an error; use
/// `Config::default()` when no file is expected.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_size == 0 {
        bail!("chunking.target_size must be greater than zero");
    }
    if config.chunking.overlap >= config.chunking.target_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.target_size ({})",
            config.chunking.overlap,
            config.chunking.target_size
        );
    }
    if config.retrieval.vector_weight < 0.0 || config.retrieval.keyword_weight < 0.0 {
        bail!("retrieval weights must be non-negative");
    }
    if config.retrieval.vector_weight + config.retrieval.keyword_weight <= 0.0 {
        bail!("at least one retrieval weight must be positive");
    }
    if !(0.0..=1.0).contains(&config.retrieval.keyword_floor) {
        bail!("retrieval.keyword_floor must be within [0, 1]");
    }
    if config.retrieval.candidate_limit == 0 {
        bail!("retrieval.candidate_limit must be greater than zero");
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.target_size, 768);
        assert_eq!(config.chunking.overlap, 75);
        assert!((config.retrieval.vector_weight - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            vector_weight = 0.5
            keyword_weight = 0.5
            "#,
        )
        .unwrap();
        assert!((config.retrieval.vector_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.candidate_limit, 20);
        assert_eq!(config.embedding.dims, 768);
    }

    #[test]
    fn test_rejects_overlap_ge_size() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.target_size;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_weights() {
        let mut config = Config::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.keyword_weight = 0.0;
        assert!(validate(&config).is_err());
    }
}
