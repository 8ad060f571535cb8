//! Idempotent schema creation.
//!
//! Run once at startup; every statement is `IF NOT EXISTS` so re-running
//! against an existing database is a no-op. Until this runs, store calls
//! that touch the chunk or cache tables surface
//! [`CoreError::StoreNotReady`](crate::error::CoreError).

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            filename      TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            index_ref     TEXT,
            error_message TEXT,
            created_at    INTEGER NOT NULL,
            updated_at    INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating documents table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            document_id   TEXT NOT NULL,
            content       TEXT NOT NULL,
            embedding     BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            chunk_index   INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating chunks table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            model        TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding    BLOB NOT NULL,
            created_at   INTEGER NOT NULL,
            PRIMARY KEY (model, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating embedding_cache table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_tenant ON chunks(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_tenant_doc ON chunks(tenant_id, document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(tenant_id)")
        .execute(pool)
        .await?;

    info!("schema migrations applied");
    Ok(())
}
