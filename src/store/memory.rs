//! In-memory [`Store`] used by unit and integration tests.
//!
//! Mirrors the SQLite store's semantics (guarded transitions,
//! insert-if-absent cache, stable chunk order) and adds fault-injection
//! toggles so pipeline tests can exercise the failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::{Chunk, Document, DocumentStatus};
use crate::store::Store;

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    /// Insertion-ordered; doubles as the tie-break order for search.
    chunks: RwLock<Vec<Chunk>>,
    cache: RwLock<HashMap<(String, String), Vec<f32>>>,
    /// When set, chunk upserts fail. Lets tests break ingestion mid-way.
    pub fail_chunk_writes: AtomicBool,
    /// When set, chunk reads/writes report [`CoreError::StoreNotReady`].
    pub not_ready: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_ready(&self) -> Result<()> {
        if self.not_ready.load(Ordering::SeqCst) {
            return Err(anyhow::Error::new(CoreError::StoreNotReady {
                detail: "no such table: chunks".to_string(),
            }));
        }
        Ok(())
    }

    fn with_document<F>(&self, document_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Document) -> Result<()>,
    {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        let doc = documents
            .get_mut(document_id)
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;
        f(doc)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        Ok(documents
            .get(document_id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn mark_processing(&self, document_id: &str) -> Result<()> {
        self.with_document(document_id, |doc| {
            if doc.status != DocumentStatus::Pending {
                return Err(anyhow::Error::new(CoreError::InvalidTransition {
                    from: doc.status,
                    to: DocumentStatus::Processing,
                }));
            }
            doc.status = DocumentStatus::Processing;
            doc.updated_at = chrono::Utc::now().timestamp();
            Ok(())
        })
    }

    async fn mark_completed(
        &self,
        document_id: &str,
        index_ref: &str,
        warning: Option<&str>,
    ) -> Result<()> {
        self.with_document(document_id, |doc| {
            if doc.status != DocumentStatus::Processing {
                return Err(anyhow::Error::new(CoreError::InvalidTransition {
                    from: doc.status,
                    to: DocumentStatus::Completed,
                }));
            }
            doc.status = DocumentStatus::Completed;
            doc.index_ref = Some(index_ref.to_string());
            doc.error_message = warning.map(|w| w.to_string());
            doc.updated_at = chrono::Utc::now().timestamp();
            Ok(())
        })
    }

    async fn mark_failed(&self, document_id: &str, error_message: &str) -> Result<()> {
        self.with_document(document_id, |doc| {
            if doc.status.is_terminal() {
                return Err(anyhow::Error::new(CoreError::InvalidTransition {
                    from: doc.status,
                    to: DocumentStatus::Failed,
                }));
            }
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(error_message.to_string());
            doc.updated_at = chrono::Utc::now().timestamp();
            Ok(())
        })
    }

    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<bool> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| anyhow!("document lock poisoned"))?;
        match documents.get(document_id) {
            Some(doc) if doc.tenant_id == tenant_id => {
                documents.remove(document_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_chunk_batch(&self, batch: &[Chunk]) -> Result<usize> {
        self.check_ready()?;
        if self.fail_chunk_writes.load(Ordering::SeqCst) {
            bail!("injected chunk write failure");
        }
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| anyhow!("chunk lock poisoned"))?;
        for chunk in batch {
            if let Some(existing) = chunks.iter_mut().find(|c| c.id == chunk.id) {
                *existing = chunk.clone();
            } else {
                chunks.push(chunk.clone());
            }
        }
        Ok(batch.len())
    }

    async fn delete_chunks(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        self.check_ready()?;
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| anyhow!("chunk lock poisoned"))?;
        let before = chunks.len();
        chunks.retain(|c| !(c.tenant_id == tenant_id && c.document_id == document_id));
        Ok((before - chunks.len()) as u64)
    }

    async fn chunk_count(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        self.check_ready()?;
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("chunk lock poisoned"))?;
        Ok(chunks
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.document_id == document_id)
            .count() as u64)
    }

    async fn tenant_chunks(&self, tenant_id: &str) -> Result<Vec<Chunk>> {
        self.check_ready()?;
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("chunk lock poisoned"))?;
        Ok(chunks
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn cache_get(&self, model: &str, content_hash: &str) -> Result<Option<Vec<f32>>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| anyhow!("cache lock poisoned"))?;
        Ok(cache
            .get(&(model.to_string(), content_hash.to_string()))
            .cloned())
    }

    async fn cache_put(&self, model: &str, content_hash: &str, embedding: &[f32]) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("cache lock poisoned"))?;
        cache
            .entry((model.to_string(), content_hash.to_string()))
            .or_insert_with(|| embedding.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, tenant: &str, status: DocumentStatus) -> Document {
        Document {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            filename: "notes.txt".to_string(),
            status,
            index_ref: None,
            error_message: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let store = MemoryStore::new();
        store
            .create_document(&doc("d1", "t1", DocumentStatus::Pending))
            .await
            .unwrap();

        store.mark_processing("d1").await.unwrap();
        // Re-marking processing must refuse.
        let err = store.mark_processing("d1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::InvalidTransition { .. })
        ));

        store.mark_completed("d1", "d1", None).await.unwrap();
        // Terminal states never move to failed.
        assert!(store.mark_failed("d1", "late failure").await.is_err());
    }

    #[tokio::test]
    async fn test_cache_insert_if_absent() {
        let store = MemoryStore::new();
        store.cache_put("m", "h", &[1.0, 2.0]).await.unwrap();
        store.cache_put("m", "h", &[9.0, 9.0]).await.unwrap();
        assert_eq!(store.cache_get("m", "h").await.unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(store.cache_get("other", "h").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = MemoryStore::new();
        store
            .create_document(&doc("d1", "t1", DocumentStatus::Completed))
            .await
            .unwrap();
        assert!(store.get_document("t2", "d1").await.unwrap().is_none());
        assert!(!store.delete_document("t2", "d1").await.unwrap());
        assert!(store.delete_document("t1", "d1").await.unwrap());
    }
}
