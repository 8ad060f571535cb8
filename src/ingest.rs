//! Document ingestion: upload acceptance and the background processing
//! state machine.
//!
//! Acceptance persists a PENDING record synchronously, so a client that
//! polls immediately after upload always sees a valid status. Processing
//! runs in a detached task per document; each transition is its own
//! store commit, which makes progress crash-visible and lets crashed
//! ingestions be diagnosed from the stored status alone.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::chunk::{chunk_text, MAX_CHUNKS_PER_DOCUMENT};
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::CoreError;
use crate::models::{Document, DocumentStatus};
use crate::store::Store;
use crate::vector_index::{make_chunk, VectorIndex};

/// Stored failure messages are truncated to this many characters.
const ERROR_MESSAGE_MAX: usize = 500;

pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    vector_index: Arc<VectorIndex>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<EmbeddingGateway>,
        vector_index: Arc<VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            vector_index,
            chunking,
        }
    }

    /// Accept an upload: persist a PENDING record and return it. The
    /// caller decides when (and whether) to [`spawn`](Self::spawn)
    /// processing.
    pub async fn accept(&self, tenant_id: &str, filename: &str) -> Result<Document> {
        let now = chrono::Utc::now().timestamp();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            filename: filename.to_string(),
            status: DocumentStatus::Pending,
            index_ref: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_document(&document)
            .await
            .context("persisting accepted document")?;
        info!(document = %document.id, tenant = tenant_id, "document accepted");
        Ok(document)
    }

    /// Process a document in a detached task. There is no global
    /// ingestion lock; per-document transitions are serialized by the
    /// task itself and guarded in the store.
    pub fn spawn(self: &Arc<Self>, document: Document, bytes: Vec<u8>) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(&document, &bytes).await;
        })
    }

    /// Run one document to a terminal state. Never returns an error;
    /// failures land in the document record.
    pub async fn run(&self, document: &Document, bytes: &[u8]) {
        if let Err(e) = self.process(document, bytes).await {
            error!(document = %document.id, error = %e, "ingestion failed");
            self.fail_document(document, &e).await;
        }
    }

    async fn process(&self, document: &Document, bytes: &[u8]) -> Result<()> {
        self.store.mark_processing(&document.id).await?;

        let text = extract_text(bytes)?;
        let outcome = chunk_text(&text, self.chunking.target_size, self.chunking.overlap);
        if outcome.chunks.is_empty() {
            return Err(anyhow::Error::new(CoreError::EmptyDocument));
        }

        let vectors = self
            .gateway
            .embed_documents(&outcome.chunks)
            .await
            .context("embedding document chunks")?;

        let rows: Vec<_> = outcome
            .chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, embedding))| {
                make_chunk(
                    &document.tenant_id,
                    &document.id,
                    &document.filename,
                    content,
                    embedding,
                    i as i64,
                )
            })
            .collect();

        let written = self
            .vector_index
            .upsert(&document.tenant_id, &rows)
            .await
            .context("indexing document chunks")?;

        let warning = outcome.truncated.then(|| {
            format!(
                "document truncated to the first {} chunks",
                MAX_CHUNKS_PER_DOCUMENT
            )
        });
        self.store
            .mark_completed(&document.id, &document.id, warning.as_deref())
            .await?;

        info!(
            document = %document.id,
            tenant = %document.tenant_id,
            chunks = written,
            truncated = warning.is_some(),
            "document indexed"
        );
        Ok(())
    }

    /// Clean up after a failed step and record FAILED. Both calls are
    /// fresh store operations, independent of whatever just failed.
    async fn fail_document(&self, document: &Document, cause: &anyhow::Error) {
        if let Err(e) = self
            .store
            .delete_chunks(&document.tenant_id, &document.id)
            .await
        {
            warn!(document = %document.id, error = %e, "partial chunk cleanup failed");
        }
        // Alternate format keeps the context chain in the stored record.
        let message = truncate_chars(&format!("{:#}", cause), ERROR_MESSAGE_MAX);
        if let Err(e) = self.store.mark_failed(&document.id, &message).await {
            error!(document = %document.id, error = %e, "could not record failure");
        }
    }

    /// Delete a document and its indexed chunks. A not-ready store is no
    /// reason to keep the document record around, so that error is
    /// logged and deletion proceeds.
    pub async fn delete(&self, tenant_id: &str, document_id: &str) -> Result<bool> {
        match self.vector_index.delete(tenant_id, document_id).await {
            Ok(removed) => {
                info!(document = document_id, chunks = removed, "chunks deleted");
            }
            Err(e) if matches!(e.downcast_ref::<CoreError>(), Some(CoreError::StoreNotReady { .. })) => {
                warn!(document = document_id, error = %e, "chunk tables missing; deleting record anyway");
            }
            Err(e) => return Err(e),
        }
        self.store.delete_document(tenant_id, document_id).await
    }

    pub async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>> {
        self.store.get_document(tenant_id, document_id).await
    }
}

/// Decode uploaded bytes as text. Invalid UTF-8 sequences are replaced
/// rather than rejected; a document with nothing readable left is a data
/// error.
fn extract_text(bytes: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if text.trim().is_empty() {
        return Err(anyhow::Error::new(CoreError::EmptyDocument));
    }
    Ok(text)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_lossy() {
        let mut bytes = b"hello ".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b" world");
        let text = extract_text(&bytes).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("world"));
    }

    #[test]
    fn test_extract_text_empty_is_error() {
        let err = extract_text(b"   \n ").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::EmptyDocument)
        ));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        let s = "é".repeat(600);
        let t = truncate_chars(&s, ERROR_MESSAGE_MAX);
        assert_eq!(t.chars().count(), ERROR_MESSAGE_MAX);
    }
}
