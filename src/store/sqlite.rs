//! SQLite-backed [`Store`] implementation.
//!
//! Every method commits independently; the ingestion state machine
//! depends on that for crash-visible progress. Chunk batches are the one
//! multi-row write and go through a single transaction, so a failed
//! batch leaves no partial rows. Missing-table errors are mapped to
//! [`CoreError::StoreNotReady`] so callers can distinguish "schema not
//! migrated" from a broken document.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::CoreError;
use crate::models::{Chunk, Document, DocumentStatus};
use crate::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Wrap schema-missing errors as [`CoreError::StoreNotReady`]; everything
/// else passes through.
fn map_store_err(e: sqlx::Error) -> anyhow::Error {
    let msg = e.to_string();
    if msg.contains("no such table") {
        anyhow::Error::new(CoreError::StoreNotReady { detail: msg })
    } else {
        e.into()
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_raw: String = row.get("status");
    let status = DocumentStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown document status in store: {}", status_raw))?;
    Ok(Document {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        filename: row.get("filename"),
        status,
        index_ref: row.get("index_ref"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    let metadata: HashMap<String, String> = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
        warn!(error = %e, "unreadable chunk metadata; treating as empty");
        HashMap::new()
    });
    Chunk {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        document_id: row.get("document_id"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        metadata,
        chunk_index: row.get("chunk_index"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, filename, status, index_ref,
                                   error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.tenant_id)
        .bind(&document.filename)
        .bind(document.status.as_str())
        .bind(&document.index_ref)
        .bind(&document.error_message)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_store_err)?;
        Ok(())
    }

    async fn get_document(&self, tenant_id: &str, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_store_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn mark_processing(&self, document_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(map_store_err)?;

        if result.rows_affected() == 0 {
            return Err(anyhow::Error::new(CoreError::InvalidTransition {
                from: self.current_status(document_id).await,
                to: DocumentStatus::Processing,
            }));
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        document_id: &str,
        index_ref: &str,
        warning: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE documents SET status = 'completed', index_ref = ?, \
             error_message = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(index_ref)
        .bind(warning)
        .bind(now)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(map_store_err)?;

        if result.rows_affected() == 0 {
            return Err(anyhow::Error::new(CoreError::InvalidTransition {
                from: self.current_status(document_id).await,
                to: DocumentStatus::Completed,
            }));
        }
        Ok(())
    }

    async fn mark_failed(&self, document_id: &str, error_message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = ?, updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(error_message)
        .bind(now)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(map_store_err)?;

        if result.rows_affected() == 0 {
            return Err(anyhow::Error::new(CoreError::InvalidTransition {
                from: self.current_status(document_id).await,
                to: DocumentStatus::Failed,
            }));
        }
        Ok(())
    }

    async fn delete_document(&self, tenant_id: &str, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(map_store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_chunk_batch(&self, chunks: &[Chunk]) -> Result<usize> {
        // One transaction per batch: a failing row must not leave the
        // batch half committed, so callers can retry the whole batch.
        let mut tx = self.pool.begin().await.map_err(map_store_err)?;
        for chunk in chunks {
            let blob = vec_to_blob(&chunk.embedding);
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, tenant_id, document_id, content, embedding,
                                    metadata_json, chunk_index)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json,
                    chunk_index = excluded.chunk_index
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.tenant_id)
            .bind(&chunk.document_id)
            .bind(&chunk.content)
            .bind(&blob)
            .bind(&metadata_json)
            .bind(chunk.chunk_index)
            .execute(&mut *tx)
            .await
            .map_err(map_store_err)?;
        }
        tx.commit().await.map_err(map_store_err)?;
        Ok(chunks.len())
    }

    async fn delete_chunks(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE tenant_id = ? AND document_id = ?")
            .bind(tenant_id)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(map_store_err)?;
        Ok(result.rows_affected())
    }

    async fn chunk_count(&self, tenant_id: &str, document_id: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM chunks WHERE tenant_id = ? AND document_id = ?",
        )
        .bind(tenant_id)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_store_err)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn tenant_chunks(&self, tenant_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE tenant_id = ? ORDER BY rowid ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_store_err)?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn cache_get(&self, model: &str, content_hash: &str) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query(
            "SELECT embedding FROM embedding_cache WHERE model = ? AND content_hash = ?",
        )
        .bind(model)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_store_err)?;
        Ok(row.map(|r| {
            let blob: Vec<u8> = r.get("embedding");
            blob_to_vec(&blob)
        }))
    }

    async fn cache_put(&self, model: &str, content_hash: &str, embedding: &[f32]) -> Result<()> {
        let blob = vec_to_blob(embedding);
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (model, content_hash, embedding, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(model, content_hash) DO NOTHING
            "#,
        )
        .bind(model)
        .bind(content_hash)
        .bind(&blob)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_store_err)?;
        Ok(())
    }
}

impl SqliteStore {
    /// Best-effort status read for transition error messages.
    async fn current_status(&self, document_id: &str) -> DocumentStatus {
        let row = sqlx::query("SELECT status FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        row.and_then(|r| {
            let raw: String = r.get("status");
            DocumentStatus::parse(&raw)
        })
        .unwrap_or(DocumentStatus::Failed)
    }
}
