//! Pluggable candidate reranking.
//!
//! Reranking refines the hybrid ordering but must never break a query:
//! the trait is infallible and every strategy degrades to the input
//! order internally when its backend misbehaves.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::embedding::{cosine_similarity, EmbeddingGateway};
use crate::generate::{GenerationClient, SamplingParams};
use crate::models::SearchResult;

/// Candidates beyond this many are dropped before reranking; scoring
/// cost grows per candidate and the tail rarely survives anyway.
pub const RERANK_INPUT_CAP: usize = 20;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` by relevance to `query`. Must return the
    /// same set of results, only permuted.
    async fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult>;
}

/// Keeps the hybrid ordering untouched. The always-available default.
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        candidates
    }
}

/// Reorders by fresh query/candidate embedding similarity. The content
/// embeddings go through the gateway, so repeat queries hit the cache.
pub struct SimilarityReranker {
    gateway: Arc<EmbeddingGateway>,
}

impl SimilarityReranker {
    pub fn new(gateway: Arc<EmbeddingGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Reranker for SimilarityReranker {
    async fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let query_vec = match self.gateway.embed_query(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "rerank embedding failed; keeping hybrid order");
                return candidates;
            }
        };

        let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.gateway.embed_documents(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "rerank embedding failed; keeping hybrid order");
                return candidates;
            }
        };

        let mut scored: Vec<(f64, SearchResult)> = candidates
            .into_iter()
            .zip(vectors)
            .map(|(c, v)| (f64::from(cosine_similarity(&query_vec, &v)), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, c)| c).collect()
    }
}

/// Scores each candidate 0–10 with the generation model. Any per-query
/// failure (transport or unparseable reply) keeps the hybrid order.
pub struct LlmReranker {
    client: Arc<dyn GenerationClient>,
    params: SamplingParams,
}

impl LlmReranker {
    pub fn new(client: Arc<dyn GenerationClient>, params: SamplingParams) -> Self {
        Self { client, params }
    }

    async fn score(&self, query: &str, content: &str) -> Option<f64> {
        let prompt = format!(
            "Rate how relevant the passage is to the question on a scale of 0 to 10. \
             Reply with a single number only.\n\nQuestion: {}\n\nPassage: {}\n\nScore:",
            query, content
        );
        let reply = self.client.generate(&prompt, &self.params).await.ok()?;
        parse_score(&reply)
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.score(query, &candidate.content).await {
                Some(s) => scored.push(s),
                None => {
                    warn!("rerank scoring failed; keeping hybrid order");
                    return candidates;
                }
            }
        }

        let mut paired: Vec<(f64, SearchResult)> =
            scored.into_iter().zip(candidates).collect();
        paired.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        paired.into_iter().map(|(_, c)| c).collect()
    }
}

/// First number in the reply, clamped to `[0, 10]`.
fn parse_score(reply: &str) -> Option<f64> {
    let token = reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|t| !t.is_empty() && t.chars().any(|c| c.is_ascii_digit()))?;
    token.parse::<f64>().ok().map(|s| s.clamp(0.0, 10.0))
}

/// Applies the configured strategy behind the input cap and final
/// truncation.
pub struct RerankService {
    strategy: Box<dyn Reranker>,
    top_n: usize,
}

impl RerankService {
    pub fn new(strategy: Box<dyn Reranker>, top_n: usize) -> Self {
        Self { strategy, top_n }
    }

    /// Build the strategy named in config. Unknown names warn and fall
    /// back to no-op rather than failing startup.
    pub fn from_strategy(
        name: &str,
        top_n: usize,
        gateway: Arc<EmbeddingGateway>,
        generation: Arc<dyn GenerationClient>,
        params: SamplingParams,
    ) -> Self {
        let strategy: Box<dyn Reranker> = match name {
            "none" => Box::new(NoOpReranker),
            "similarity" => Box::new(SimilarityReranker::new(gateway)),
            "llm" => Box::new(LlmReranker::new(generation, params)),
            other => {
                warn!(strategy = other, "unknown rerank strategy; using none");
                Box::new(NoOpReranker)
            }
        };
        Self::new(strategy, top_n)
    }

    pub async fn apply(&self, query: &str, mut candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        candidates.truncate(RERANK_INPUT_CAP);
        let mut reranked = self.strategy.rerank(query, candidates).await;
        reranked.truncate(self.top_n);
        reranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::GenerateError;

    fn result(id: &str, combined: f64) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            content: format!("content {}", id),
            source_filename: "notes.txt".to_string(),
            vector_score: combined,
            keyword_score: 0.0,
            combined_score: combined,
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl GenerationClient for FailingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &SamplingParams,
        ) -> Result<String, GenerateError> {
            Err(GenerateError::Unreachable("down".to_string()))
        }
    }

    struct ReverseScoringGenerator;

    #[async_trait]
    impl GenerationClient for ReverseScoringGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _params: &SamplingParams,
        ) -> Result<String, GenerateError> {
            // Score "content b" above "content a".
            if prompt.contains("content b") {
                Ok("9".to_string())
            } else {
                Ok("Score: 3".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_noop_preserves_order() {
        let service = RerankService::new(Box::new(NoOpReranker), 10);
        let input = vec![result("a", 0.9), result("b", 0.5)];
        let out = service.apply("q", input.clone()).await;
        let ids: Vec<_> = out.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cap_and_top_n() {
        let service = RerankService::new(Box::new(NoOpReranker), 3);
        let input: Vec<SearchResult> = (0..30).map(|i| result(&format!("c{}", i), 0.5)).collect();
        let out = service.apply("q", input).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].chunk_id, "c0");
    }

    #[tokio::test]
    async fn test_llm_reranker_reorders() {
        let reranker = LlmReranker::new(Arc::new(ReverseScoringGenerator), SamplingParams::default());
        let out = reranker
            .rerank("q", vec![result("a", 0.9), result("b", 0.5)])
            .await;
        assert_eq!(out[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_input_order() {
        let reranker = LlmReranker::new(Arc::new(FailingGenerator), SamplingParams::default());
        let out = reranker
            .rerank("q", vec![result("a", 0.9), result("b", 0.5)])
            .await;
        let ids: Vec<_> = out.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("7"), Some(7.0));
        assert_eq!(parse_score("Score: 8.5"), Some(8.5));
        assert_eq!(parse_score("The answer is 42"), Some(10.0));
        assert_eq!(parse_score("no number here"), None);
    }
}
