//! Tenant-scoped vector search over stored chunk embeddings.
//!
//! Small tenants are searched with exact brute-force cosine; once a
//! tenant holds enough valid vectors an HNSW graph is built and cached
//! per tenant. Writes bump a per-tenant generation counter so a cached
//! graph is never consulted after its rows changed.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use hnsw_rs::hnsw::{Hnsw, Neighbour};
use hnsw_rs::prelude::*;
use tracing::{debug, warn};

use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::models::{Chunk, ChunkCandidate};
use crate::store::Store;

const HNSW_M: usize = 16;
const HNSW_MAX_LAYER: usize = 16;
const HNSW_EF_CONSTRUCTION: usize = 200;
const HNSW_EF_SEARCH: usize = 100;

/// Below this many valid vectors brute force is both exact and faster
/// than building a graph.
const ANN_BUILD_THRESHOLD: usize = 64;

/// Rows written per store call during upsert.
pub const UPSERT_BATCH_SIZE: usize = 400;

struct TenantCell {
    generation: u64,
    hnsw: ManuallyDrop<Hnsw<'static, f32, DistCosine>>,
    /// Valid chunks in insertion order; HNSW ids index into this.
    chunks: Vec<Chunk>,
    /// Slices lent to the graph to satisfy its `'static` bound; owned by
    /// this cell and reclaimed when it drops.
    vectors: Vec<&'static [f32]>,
}

impl Drop for TenantCell {
    fn drop(&mut self) {
        // The graph borrows the slices, so it must go first.
        unsafe { ManuallyDrop::drop(&mut self.hnsw) };
        for slice in self.vectors.drain(..) {
            let ptr = slice as *const [f32] as *mut [f32];
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

pub struct VectorIndex {
    store: Arc<dyn Store>,
    dims: usize,
    generations: RwLock<HashMap<String, u64>>,
    cells: RwLock<HashMap<String, Arc<TenantCell>>>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn Store>, dims: usize) -> Self {
        Self {
            store,
            dims,
            generations: RwLock::new(HashMap::new()),
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Write chunks for one document in batches of [`UPSERT_BATCH_SIZE`],
    /// idempotent on chunk id. Every row must carry the call's
    /// `tenant_id`; a stray row rejects the whole call before anything
    /// is written. Returns the number of rows written; a failing batch
    /// reports how many rows were already applied.
    pub async fn upsert(&self, tenant_id: &str, chunks: &[Chunk]) -> Result<usize> {
        if let Some(stray) = chunks.iter().find(|c| c.tenant_id != tenant_id) {
            bail!(
                "chunk {} belongs to tenant {}, not {}",
                stray.id,
                stray.tenant_id,
                tenant_id
            );
        }
        let mut written = 0usize;
        for batch in chunks.chunks(UPSERT_BATCH_SIZE) {
            written += self
                .store
                .upsert_chunk_batch(batch)
                .await
                .with_context(|| format!("chunk batch failed after {} rows written", written))?;
        }
        self.invalidate(tenant_id);
        Ok(written)
    }

    /// Remove a document's chunks and invalidate the tenant's graph.
    pub async fn delete(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        let removed = self.store.delete_chunks(tenant_id, document_id).await?;
        self.invalidate(tenant_id);
        Ok(removed)
    }

    pub async fn chunk_count(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        self.store.chunk_count(tenant_id, document_id).await
    }

    /// Nearest chunks for `query` within one tenant, best first.
    ///
    /// Scores are cosine similarity in `[-1, 1]`. Stored rows whose
    /// embedding does not match the configured dimensionality are skipped.
    pub async fn search(
        &self,
        tenant_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkCandidate>> {
        if query.len() != self.dims {
            return Err(anyhow::Error::new(CoreError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            }));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let generation = self.generation(tenant_id);
        if let Some(cell) = self.cached_cell(tenant_id, generation) {
            return Ok(Self::search_cell(&cell, query, limit));
        }

        let rows = self.store.tenant_chunks(tenant_id).await?;
        let total = rows.len();
        let valid: Vec<Chunk> = rows
            .into_iter()
            .filter(|c| c.embedding.len() == self.dims)
            .collect();
        if valid.len() < total {
            warn!(
                tenant = tenant_id,
                skipped = total - valid.len(),
                "skipping chunks with mismatched embedding dimensionality"
            );
        }

        if valid.len() < ANN_BUILD_THRESHOLD {
            return Ok(Self::brute_force(&valid, query, limit));
        }

        let cell = Arc::new(Self::build_cell(generation, valid));
        debug!(tenant = tenant_id, vectors = cell.chunks.len(), "built tenant graph");
        if let Ok(mut cells) = self.cells.write() {
            cells.insert(tenant_id.to_string(), cell.clone());
        }
        Ok(Self::search_cell(&cell, query, limit))
    }

    fn generation(&self, tenant_id: &str) -> u64 {
        self.generations
            .read()
            .ok()
            .and_then(|g| g.get(tenant_id).copied())
            .unwrap_or(0)
    }

    fn invalidate(&self, tenant_id: &str) {
        if let Ok(mut generations) = self.generations.write() {
            *generations.entry(tenant_id.to_string()).or_insert(0) += 1;
        }
        if let Ok(mut cells) = self.cells.write() {
            cells.remove(tenant_id);
        }
    }

    fn cached_cell(&self, tenant_id: &str, generation: u64) -> Option<Arc<TenantCell>> {
        let cells = self.cells.read().ok()?;
        cells
            .get(tenant_id)
            .filter(|cell| cell.generation == generation)
            .cloned()
    }

    fn build_cell(generation: u64, chunks: Vec<Chunk>) -> TenantCell {
        let hnsw: Hnsw<f32, DistCosine> = Hnsw::new(
            HNSW_M,
            chunks.len(),
            HNSW_MAX_LAYER,
            HNSW_EF_CONSTRUCTION,
            DistCosine,
        );

        // hnsw_rs wants slices that outlive the graph; lease one boxed
        // copy per vector and take it back in the cell's Drop, so a
        // rebuild never strands the previous generation's copies.
        let mut leased = Vec::with_capacity(chunks.len());
        let vectors: Vec<(&[f32], usize)> = chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let slice: &'static [f32] = Box::leak(chunk.embedding.clone().into_boxed_slice());
                leased.push(slice);
                (slice, idx)
            })
            .collect();
        hnsw.parallel_insert_slice(&vectors);

        TenantCell {
            generation,
            hnsw: ManuallyDrop::new(hnsw),
            chunks,
            vectors: leased,
        }
    }

    fn search_cell(cell: &TenantCell, query: &[f32], limit: usize) -> Vec<ChunkCandidate> {
        let neighbours: Vec<Neighbour> = cell.hnsw.search(query, limit, HNSW_EF_SEARCH);
        neighbours
            .into_iter()
            .filter_map(|n| {
                cell.chunks.get(n.d_id).map(|chunk| ChunkCandidate {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    source_filename: chunk.source_filename().to_string(),
                    // DistCosine reports 1 − cos(θ).
                    raw_score: f64::from(1.0 - n.distance),
                })
            })
            .collect()
    }

    fn brute_force(chunks: &[Chunk], query: &[f32], limit: usize) -> Vec<ChunkCandidate> {
        let mut scored: Vec<ChunkCandidate> = chunks
            .iter()
            .map(|chunk| ChunkCandidate {
                chunk_id: chunk.id.clone(),
                content: chunk.content.clone(),
                source_filename: chunk.source_filename().to_string(),
                raw_score: f64::from(cosine_similarity(&chunk.embedding, query)),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        scored
    }
}

/// Build a chunk row for ingestion, recording the source filename in the
/// chunk metadata.
pub fn make_chunk(
    tenant_id: &str,
    document_id: &str,
    filename: &str,
    content: String,
    embedding: Vec<f32>,
    chunk_index: i64,
) -> Chunk {
    let mut metadata = HashMap::new();
    metadata.insert("filename".to_string(), filename.to_string());
    Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        document_id: document_id.to_string(),
        content,
        embedding,
        metadata,
        chunk_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn chunk(tenant: &str, doc: &str, id: &str, embedding: Vec<f32>) -> Chunk {
        let mut c = make_chunk(tenant, doc, "notes.txt", format!("content {}", id), embedding, 0);
        c.id = id.to_string();
        c
    }

    fn index(dims: usize) -> VectorIndex {
        VectorIndex::new(Arc::new(MemoryStore::new()), dims)
    }

    #[tokio::test]
    async fn test_brute_force_orders_by_similarity() {
        let idx = index(3);
        idx.upsert(
            "t1",
            &[
                chunk("t1", "d1", "far", vec![0.0, 1.0, 0.0]),
                chunk("t1", "d1", "near", vec![1.0, 0.0, 0.0]),
                chunk("t1", "d1", "mid", vec![0.7, 0.7, 0.0]),
            ],
        )
        .await
        .unwrap();

        let results = idx.search("t1", &[1.0, 0.0, 0.0], 10).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!((results[0].raw_score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let idx = index(2);
        idx.upsert("t1", &[chunk("t1", "d1", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        idx.upsert("t2", &[chunk("t2", "d2", "b", vec![1.0, 0.0])])
            .await
            .unwrap();

        let results = idx.search("t1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_error() {
        let idx = index(3);
        let err = idx.search("t1", &[1.0], 10).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_mismatched_rows_are_skipped() {
        let idx = index(2);
        idx.upsert(
            "t1",
            &[
                chunk("t1", "d1", "good", vec![1.0, 0.0]),
                chunk("t1", "d1", "corrupt", vec![1.0, 0.0, 0.0]),
            ],
        )
        .await
        .unwrap();
        let results = idx.search("t1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "good");
    }

    #[tokio::test]
    async fn test_delete_removes_document_rows() {
        let idx = index(2);
        idx.upsert(
            "t1",
            &[
                chunk("t1", "d1", "a", vec![1.0, 0.0]),
                chunk("t1", "d2", "b", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(idx.delete("t1", "d1").await.unwrap(), 1);
        let results = idx.search("t1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn test_upsert_rejects_foreign_tenant_rows() {
        let idx = index(2);
        let err = idx
            .upsert("t1", &[chunk("t2", "d1", "stray", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tenant"));
        // Nothing may have been written under either tenant.
        assert_eq!(idx.chunk_count("t2", "d1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let idx = index(2);
        let rows = vec![chunk("t1", "d1", "a", vec![1.0, 0.0])];
        idx.upsert("t1", &rows).await.unwrap();
        idx.upsert("t1", &rows).await.unwrap();
        assert_eq!(idx.chunk_count("t1", "d1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_graph_rebuilds_after_writes() {
        let idx = index(4);
        let mut rows = Vec::new();
        for i in 0..80u32 {
            let angle = i as f32 * 0.05;
            rows.push(chunk(
                "t1",
                "d1",
                &format!("c{}", i),
                vec![angle.cos(), angle.sin(), 0.0, 0.0],
            ));
        }
        idx.upsert("t1", &rows).await.unwrap();
        // First search builds the graph cell.
        idx.search("t1", &rows[0].embedding.clone(), 3).await.unwrap();

        // A later write invalidates it; the rebuilt graph must see the
        // new row.
        let fresh = chunk("t1", "d2", "fresh", vec![0.0, 0.0, 1.0, 0.0]);
        idx.upsert("t1", &[fresh.clone()]).await.unwrap();
        let results = idx.search("t1", &fresh.embedding, 3).await.unwrap();
        assert_eq!(results[0].chunk_id, "fresh");

        // Deleting swaps in yet another generation.
        idx.delete("t1", "d2").await.unwrap();
        let results = idx.search("t1", &fresh.embedding, 3).await.unwrap();
        assert!(results.iter().all(|r| r.chunk_id != "fresh"));
    }

    #[tokio::test]
    async fn test_graph_path_finds_exact_match() {
        let idx = index(4);
        // Enough rows to cross the graph-build threshold.
        let mut rows = Vec::new();
        for i in 0..100u32 {
            let angle = i as f32 * 0.05;
            rows.push(chunk(
                "t1",
                "d1",
                &format!("c{}", i),
                vec![angle.cos(), angle.sin(), 0.1, 0.2],
            ));
        }
        idx.upsert("t1", &rows).await.unwrap();

        let target = rows[42].embedding.clone();
        let results = idx.search("t1", &target, 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, "c42");
        assert!((results[0].raw_score - 1.0).abs() < 1e-3);
    }
}
