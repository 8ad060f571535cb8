//! Hybrid search: weighted fusion of vector and keyword candidates.
//!
//! The two searches run independently and are merged by chunk id. A
//! chunk found by only one search keeps an explicit `0.0` for the other
//! component; "the other method did not find this" is information, not a
//! gap to impute. Ordering is combined score descending with ties broken
//! by first discovery (vector order, then keyword order), which makes
//! result order deterministic across runs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::keyword_index::KeywordIndex;
use crate::models::{ChunkCandidate, SearchResult};
use crate::vector_index::VectorIndex;

pub struct HybridSearchCoordinator {
    vector: Arc<VectorIndex>,
    keyword: Arc<KeywordIndex>,
}

impl HybridSearchCoordinator {
    pub fn new(vector: Arc<VectorIndex>, keyword: Arc<KeywordIndex>) -> Self {
        Self { vector, keyword }
    }

    /// Run both searches capped at `limit` and fuse the results.
    ///
    /// `combined = vector_weight * vector_score + keyword_weight *
    /// keyword_score`. Both searches coming back empty is an empty
    /// result, not an error.
    pub async fn search(
        &self,
        tenant_id: &str,
        query_text: &str,
        query_vec: &[f32],
        limit: usize,
        vector_weight: f64,
        keyword_weight: f64,
    ) -> Result<Vec<SearchResult>> {
        let vector_hits = self.vector.search(tenant_id, query_vec, limit).await?;
        let keyword_hits = self.keyword.search(tenant_id, query_text, limit).await?;

        let mut results = merge_candidates(&vector_hits, &keyword_hits, vector_weight, keyword_weight);
        results.truncate(limit);
        Ok(results)
    }
}

/// Merge candidate lists by chunk id, preserving discovery order for the
/// tie-break, then stable-sort by combined score.
fn merge_candidates(
    vector_hits: &[ChunkCandidate],
    keyword_hits: &[ChunkCandidate],
    vector_weight: f64,
    keyword_weight: f64,
) -> Vec<SearchResult> {
    let mut order: Vec<SearchResult> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits {
        by_id.insert(hit.chunk_id.clone(), order.len());
        order.push(SearchResult {
            chunk_id: hit.chunk_id.clone(),
            content: hit.content.clone(),
            source_filename: hit.source_filename.clone(),
            vector_score: hit.raw_score,
            keyword_score: 0.0,
            combined_score: 0.0,
        });
    }

    for hit in keyword_hits {
        match by_id.get(&hit.chunk_id) {
            Some(&idx) => order[idx].keyword_score = hit.raw_score,
            None => {
                by_id.insert(hit.chunk_id.clone(), order.len());
                order.push(SearchResult {
                    chunk_id: hit.chunk_id.clone(),
                    content: hit.content.clone(),
                    source_filename: hit.source_filename.clone(),
                    vector_score: 0.0,
                    keyword_score: hit.raw_score,
                    combined_score: 0.0,
                });
            }
        }
    }

    for result in &mut order {
        result.combined_score =
            vector_weight * result.vector_score + keyword_weight * result.keyword_score;
    }

    // sort_by is stable, so equal scores keep discovery order.
    order.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}
