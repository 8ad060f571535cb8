//! Core error taxonomy.
//!
//! Only the error classes callers need to distinguish get a typed variant
//! here; transport and SQL errors travel as `anyhow::Error` with context.
//! The important split is between infrastructure-not-ready errors (which
//! operators can fix, and which must not be confused with a broken
//! document) and per-document data errors (which fail one ingestion and
//! nothing else).

use thiserror::Error;

use crate::models::DocumentStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The chunk/cache tables do not exist yet. Deletion paths treat this
    /// as skippable; ingestion and query surface the remediation text.
    #[error("store not ready: {detail}. Run docqa::migrate::run_migrations against this database to create the chunk and cache tables, then re-upload documents.")]
    StoreNotReady { detail: String },

    /// A stored vector does not match the deployment dimensionality.
    /// This is corruption, never a retrievable candidate.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A guarded status transition found the document in a different
    /// state than expected.
    #[error("invalid document status transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// The uploaded bytes contain no extractable text.
    #[error("document has no extractable text")]
    EmptyDocument,

    /// Every text in a non-empty embedding batch failed. Single failures
    /// degrade to zero vectors instead; see `EmbeddingGateway`.
    #[error("embedding service unavailable: all texts in the batch failed")]
    EmbeddingUnavailable,
}
