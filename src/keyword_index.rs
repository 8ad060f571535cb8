//! Trigram-based keyword search, tenant scoped.
//!
//! Trigrams are built the pg_trgm way: each word is lowercased and
//! padded, then split into 3-character windows. Scoring follows
//! `word_similarity` semantics: the fraction of the *query's* trigrams
//! found in the chunk, so chunk length never dilutes a short query's
//! match. Scores below the floor are excluded entirely rather than
//! ranked low, so a near-miss on spelling still matches but unrelated
//! text never does.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::models::ChunkCandidate;
use crate::store::Store;

pub struct KeywordIndex {
    store: Arc<dyn Store>,
    /// Minimum similarity that counts as a match.
    floor: f64,
}

impl KeywordIndex {
    pub fn new(store: Arc<dyn Store>, floor: f64) -> Self {
        Self { store, floor }
    }

    /// Fuzzy-match `query_text` against a tenant's chunk text, best
    /// first, truncated to `limit`.
    pub async fn search(
        &self,
        tenant_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        let query_trigrams = trigrams(query_text);
        if query_trigrams.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let chunks = self.store.tenant_chunks(tenant_id).await?;
        let mut scored: Vec<ChunkCandidate> = chunks
            .iter()
            .filter_map(|chunk| {
                let score = query_similarity(&query_trigrams, &trigrams(&chunk.content));
                if score >= self.floor {
                    Some(ChunkCandidate {
                        chunk_id: chunk.id.clone(),
                        content: chunk.content.clone(),
                        source_filename: chunk.source_filename().to_string(),
                        raw_score: score,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Trigram set of a text: per lowercase word, two leading spaces and one
/// trailing space of padding, then every 3-char window.
fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Fraction of the query's trigrams present in the content. Asymmetric
/// on purpose: the chunk side may be arbitrarily long without lowering
/// the score of a query it contains.
fn query_similarity(query: &HashSet<String>, content: &HashSet<String>) -> f64 {
    if query.is_empty() || content.is_empty() {
        return 0.0;
    }
    let overlap = query.intersection(content).count();
    overlap as f64 / query.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::store::memory::MemoryStore;
    use std::collections::HashMap;

    fn chunk(id: &str, tenant: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            document_id: "d1".to_string(),
            content: content.to_string(),
            embedding: vec![0.0; 2],
            metadata: HashMap::new(),
            chunk_index: 0,
        }
    }

    async fn index_with(chunks: Vec<Chunk>) -> KeywordIndex {
        let store = Arc::new(MemoryStore::new());
        store.upsert_chunk_batch(&chunks).await.unwrap();
        KeywordIndex::new(store, 0.3)
    }

    #[test]
    fn test_identical_words_score_one() {
        let a = trigrams("hello");
        assert!((query_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unrelated_words_score_zero() {
        let a = trigrams("hello");
        let b = trigrams("xyzzy");
        assert!(query_similarity(&a, &b) < 0.1);
    }

    #[test]
    fn test_content_length_does_not_dilute() {
        let query = trigrams("revenue");
        let short = trigrams("revenue report");
        let long = trigrams(
            "the quarterly revenue report covers many regions, product \
             lines, currencies, adjustments, and one-off items in detail",
        );
        let short_score = query_similarity(&query, &short);
        let long_score = query_similarity(&query, &long);
        assert!((short_score - 1.0).abs() < f64::EPSILON);
        assert!((long_score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(trigrams("Hello World"), trigrams("hello world"));
    }

    #[tokio::test]
    async fn test_typo_still_matches() {
        let idx = index_with(vec![chunk("c1", "t1", "database connection settings")]).await;
        let results = idx.search("t1", "databse", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_floor_excludes_weak_matches() {
        let idx = index_with(vec![
            chunk("c1", "t1", "quarterly revenue report"),
            chunk("c2", "t1", "completely unrelated gardening tips"),
        ])
        .await;
        let results = idx.search("t1", "revenue", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_tenant_scoped() {
        let idx = index_with(vec![
            chunk("c1", "t1", "shared terminology"),
            chunk("c2", "t2", "shared terminology"),
        ])
        .await;
        let results = idx.search("t1", "terminology", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let idx = index_with(vec![chunk("c1", "t1", "some text")]).await;
        assert!(idx.search("t1", "", 10).await.unwrap().is_empty());
        assert!(idx.search("t1", "  !! ", 10).await.unwrap().is_empty());
    }
}
