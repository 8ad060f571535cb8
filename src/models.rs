//! Data model shared across the ingestion and query pipelines.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Document processing lifecycle.
///
/// `Pending` is written synchronously at upload acceptance, before any
/// chunking happens, so a client polling immediately after upload always
/// observes a valid state. `Completed` and `Failed` are terminal; a
/// failed document is re-ingested by a new upload, never retried
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document record, the subject of the ingestion state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    /// Set on completion; identifies the indexed chunk set.
    pub index_ref: Option<String>,
    /// Failure reason when status is `Failed`; a completed document may
    /// carry a non-fatal warning here (e.g. chunk-cap truncation).
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn ready_for_query(&self) -> bool {
        self.status == DocumentStatus::Completed
    }
}

/// An indexed text segment with its embedding.
///
/// Owned exclusively by its parent document and deleted en masse with it.
/// The embedding length must equal the deployment dimensionality; rows
/// that decode to a different length are treated as corrupt and skipped
/// by search, never ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub tenant_id: String,
    pub document_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
    pub chunk_index: i64,
}

impl Chunk {
    /// Source filename recorded at ingestion time, if any.
    pub fn source_filename(&self) -> &str {
        self.metadata.get("filename").map_or("unknown", |s| s.as_str())
    }
}

/// A candidate chunk returned by one of the two searches, before fusion.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub content: String,
    pub source_filename: String,
    /// Cosine similarity for vector search, trigram similarity for
    /// keyword search. Both land in `[0, 1]` for realistic inputs.
    pub raw_score: f64,
}

/// A fused search result. Ephemeral, produced fresh per query.
///
/// Component scores are explicit fields: a chunk missed by one search
/// carries `0.0` for that dimension, which is informative ("not found by
/// that method"), not an imputed neutral value.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub source_filename: String,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub combined_score: f64,
}

/// The query pipeline's output: generated answer plus the distinct
/// filenames of the chunks that grounded it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DocumentStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DocumentStatus::Pending.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_source_filename_fallback() {
        let chunk = Chunk {
            id: "c1".into(),
            tenant_id: "t1".into(),
            document_id: "d1".into(),
            content: String::new(),
            embedding: vec![],
            metadata: HashMap::new(),
            chunk_index: 0,
        };
        assert_eq!(chunk.source_filename(), "unknown");
    }
}
