//! Multi-tenant document question-answering core.
//!
//! The crate covers the retrieval side of a document QA service: text
//! chunking, cached embeddings, hybrid vector/keyword search with
//! optional reranking, and a resumable per-document ingestion state
//! machine over SQLite.
//!
//! # Pipeline shape
//!
//! Ingestion: accept upload → PENDING record → detached task: chunk →
//! embed (through the content-addressed cache) → batch upsert →
//! COMPLETED (or FAILED with cleanup).
//!
//! Query: embed question → vector + keyword search fused by weighted
//! score → rerank → top chunks as generation context → answer with
//! source filenames. Every failure class degrades to a user-facing
//! message instead of an error.
//!
//! All retrieval is tenant scoped; no operation crosses a `tenant_id`
//! boundary.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod keyword_index;
pub mod migrate;
pub mod models;
pub mod query;
pub mod rerank;
pub mod search;
pub mod store;
pub mod vector_index;

pub use config::Config;
pub use error::CoreError;
pub use models::{Answer, Chunk, Document, DocumentStatus, SearchResult};
