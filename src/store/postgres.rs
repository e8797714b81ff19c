//! Postgres + pgvector [`DocumentStore`].
//!
//! Embeddings are bound as pgvector text literals (`[0.1,0.2,...]`) and cast
//! with `::vector`, which keeps the driver free of a vector type mapping.
//! Document ids and claim tokens are bound as text and cast with `::uuid`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::{Claim, DocumentStore};
use crate::error::{ErrorKind, IngestError, Origin, Result};
use crate::models::{EmbeddedChunk, UploadEvent};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Render a vector in pgvector's text input format.
pub fn vector_literal(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn db_error(err: sqlx::Error) -> IngestError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22P02") => {
            IngestError::unprocessable(Origin::Database, format!("invalid input: {}", db.message()))
        }
        sqlx::Error::PoolTimedOut => IngestError::new(
            ErrorKind::Timeout,
            Origin::Database,
            "timed out waiting for a database connection",
        ),
        _ => IngestError::transient(Origin::Database, format!("database error: {}", err)),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn claim(&self, document_id: &str) -> Result<Option<Claim>> {
        let claim = Claim::new(document_id);
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', processing_started_at = now(),
                claim_token = $2::uuid, error_message = NULL
            WHERE id = $1::uuid AND status = 'uploaded'
            "#,
        )
        .bind(document_id)
        .bind(claim.token.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok((result.rows_affected() == 1).then_some(claim))
    }

    async fn holds(&self, claim: &Claim) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM documents
            WHERE id = $1::uuid AND status = 'processing' AND claim_token = $2::uuid
            "#,
        )
        .bind(&claim.document_id)
        .bind(claim.token.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.is_some())
    }

    async fn persist_chunks(
        &self,
        claim: &Claim,
        tenant_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<()> {
        let document_id = claim.document_id.as_str();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (document_id, tenant_id, chunk_index, content, embedding)
                VALUES ($1::uuid, $2, $3, $4, $5::vector)
                ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(document_id)
            .bind(tenant_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vector_literal(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        // Leftovers from an earlier run that produced more chunks
        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1::uuid AND chunk_index >= $2")
            .bind(document_id)
            .bind(chunks.len() as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'ready', error_message = NULL, claim_token = NULL
            WHERE id = $1::uuid AND status = 'processing' AND claim_token = $2::uuid
            "#,
        )
        .bind(document_id)
        .bind(claim.token.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() != 1 {
            tx.rollback().await.map_err(db_error)?;
            return Err(IngestError::new(
                ErrorKind::Conflict,
                Origin::Database,
                format!("claim on document {} is no longer held", document_id),
            ));
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn mark_failed(&self, claim: &Claim, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed', error_message = $3, claim_token = NULL
            WHERE id = $1::uuid AND status = 'processing' AND claim_token = $2::uuid
            "#,
        )
        .bind(&claim.document_id)
        .bind(claim.token.to_string())
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn reap_stale(&self, lease: Duration) -> Result<Vec<UploadEvent>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            UPDATE documents
            SET status = 'uploaded', processing_started_at = NULL, claim_token = NULL
            WHERE status = 'processing'
              AND (processing_started_at IS NULL
                   OR processing_started_at < now() - make_interval(secs => $1))
            RETURNING id::text, COALESCE(tenant_id, ''), storage_key, COALESCE(file_name, '')
            "#,
        )
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|(document_id, tenant_id, storage_key, file_name)| UploadEvent {
                event_id: String::new(),
                document_id,
                tenant_id,
                storage_key,
                file_name,
            })
            .collect())
    }
}
