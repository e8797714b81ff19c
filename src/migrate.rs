use anyhow::Result;
use sqlx::PgPool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.database).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema if missing. Safe to run against a database the
/// upload service already created.
pub async fn apply(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            tenant_id TEXT NOT NULL,
            uploaded_by TEXT,
            file_name TEXT,
            storage_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'uploaded'
                CHECK (status IN ('uploaded', 'processing', 'ready', 'failed')),
            error_message TEXT,
            processing_started_at TIMESTAMPTZ,
            claim_token UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Older deployments predate these columns
    sqlx::query("ALTER TABLE documents ADD COLUMN IF NOT EXISTS error_message TEXT")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE documents ADD COLUMN IF NOT EXISTS processing_started_at TIMESTAMPTZ")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE documents ADD COLUMN IF NOT EXISTS claim_token UUID")
        .execute(pool)
        .await?;

    // Create chunks table; embedding dimension is left open so the model can change
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id BIGSERIAL PRIMARY KEY,
            document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            tenant_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding vector NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_tenant ON document_chunks(tenant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_processing
            ON documents(processing_started_at)
            WHERE status = 'processing'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
