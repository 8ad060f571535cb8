//! Persistence abstraction for documents, chunks, and the embedding
//! cache.
//!
//! Every chunk operation takes a `tenant_id` and implementations must
//! scope their predicates by it; a missing tenant filter is a data leak,
//! not a performance bug. Each call is its own commit, which is what the
//! ingestion state machine relies on for crash-visible progress.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    // --- document lifecycle ---

    /// Persist a new PENDING document record.
    async fn create_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>>;

    /// Guarded PENDING → PROCESSING transition. Errors with
    /// [`CoreError::InvalidTransition`](crate::error::CoreError) when the
    /// stored status is not PENDING.
    async fn mark_processing(&self, document_id: &str) -> Result<()>;

    /// Guarded PROCESSING → COMPLETED transition. `warning` records a
    /// non-fatal ingestion note (e.g. chunk-cap truncation).
    async fn mark_completed(
        &self,
        document_id: &str,
        index_ref: &str,
        warning: Option<&str>,
    ) -> Result<()>;

    /// PENDING/PROCESSING → FAILED. The message is truncated by the
    /// caller; FAILED is terminal.
    async fn mark_failed(&self, document_id: &str, error_message: &str) -> Result<()>;

    /// Delete the document record. Returns false when no row matched.
    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<bool>;

    // --- chunks ---

    /// Upsert one batch of chunks, idempotent on chunk id. The batch is
    /// atomic: on failure none of its rows persist, so a caller can
    /// retry it wholesale. Returns the number of rows written.
    async fn upsert_chunk_batch(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Delete all chunks of a document. Returns the rows removed.
    async fn delete_chunks(&self, tenant_id: &str, document_id: &str) -> Result<u64>;

    async fn chunk_count(&self, tenant_id: &str, document_id: &str) -> Result<u64>;

    /// All chunks for a tenant in stable insertion order. Both indexes
    /// scan this; the order doubles as the search tie-break.
    async fn tenant_chunks(&self, tenant_id: &str) -> Result<Vec<Chunk>>;

    // --- embedding cache ---

    async fn cache_get(&self, model: &str, content_hash: &str) -> Result<Option<Vec<f32>>>;

    /// Insert-if-absent; an existing entry is never overwritten.
    async fn cache_put(&self, model: &str, content_hash: &str, embedding: &[f32]) -> Result<()>;
}
