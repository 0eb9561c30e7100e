//! Durable store access: pool construction, migrations, and the
//! processed-message repository.
//!
//! Idempotency is anchored here. The `processed_messages` table holds a
//! unique constraint on `message_id`, and every write goes through an
//! `INSERT ... ON CONFLICT` whose `rows_affected` tells the caller
//! whether it won or lost a concurrent race for the id. No distributed
//! transaction wraps the check-then-insert sequence; losing the race is
//! a benign duplicate signal, not a failure.

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::models::{NewProcessedMessage, ProcessedMessage, ProcessingStatus};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

/// Create and verify a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    debug!(
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout_secs,
        "creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("database pool created and verified");

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations completed");
    Ok(())
}

/// Hand-written query surface over the `processed_messages` table.
#[derive(Clone)]
pub struct ProcessedMessageRepository {
    pool: PgPool,
}

impl ProcessedMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deduplication gate: whether a terminal SUCCESS record exists for
    /// this id. Read-only; called before any write on the processing
    /// path. A FAILED record does not count as completed, so a retried
    /// delivery of a previously failed message passes the gate and gets
    /// its reattempt.
    pub async fn is_completed(&self, message_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_messages
                WHERE message_id = $1 AND status = 'SUCCESS'
            ) AS completed
            "#,
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("completed")?)
    }

    /// Persist a SUCCESS record for this delivery. Returns `false` when
    /// another worker already holds the id with a SUCCESS record (the
    /// lost check-then-insert race); a prior FAILED record for the same
    /// id is promoted instead of duplicated. A SUCCESS record is never
    /// overwritten.
    pub async fn record_success(&self, record: &NewProcessedMessage) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages
                (message_id, content, sender, metadata, received_at, processed_at, status, error_detail)
            VALUES ($1, $2, $3, $4, $5, $6, 'SUCCESS', NULL)
            ON CONFLICT (message_id) DO UPDATE
                SET status = 'SUCCESS',
                    processed_at = EXCLUDED.processed_at,
                    error_detail = NULL
                WHERE processed_messages.status = 'FAILED'
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.content)
        .bind(&record.sender)
        .bind(&record.metadata)
        .bind(record.received_at)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist (or refresh) a FAILED record with the error detail from
    /// this attempt. Never touches a SUCCESS record.
    pub async fn record_failure(
        &self,
        record: &NewProcessedMessage,
        error_detail: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_messages
                (message_id, content, sender, metadata, received_at, processed_at, status, error_detail)
            VALUES ($1, $2, $3, $4, $5, $6, 'FAILED', $7)
            ON CONFLICT (message_id) DO UPDATE
                SET processed_at = EXCLUDED.processed_at,
                    error_detail = EXCLUDED.error_detail
                WHERE processed_messages.status = 'FAILED'
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.content)
        .bind(&record.sender)
        .bind(&record.metadata)
        .bind(record.received_at)
        .bind(record.processed_at)
        .bind(error_detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_all(&self) -> Result<Vec<ProcessedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, content, sender, metadata,
                   received_at, processed_at, status, error_detail
            FROM processed_messages
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    pub async fn find_by_status(&self, status: ProcessingStatus) -> Result<Vec<ProcessedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, content, sender, metadata,
                   received_at, processed_at, status, error_detail
            FROM processed_messages
            WHERE status = $1
            ORDER BY id
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    pub async fn find_by_sender(&self, sender: &str) -> Result<Vec<ProcessedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, content, sender, metadata,
                   received_at, processed_at, status, error_detail
            FROM processed_messages
            WHERE sender = $1
            ORDER BY id
            "#,
        )
        .bind(sender)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }
}

fn row_to_message(row: PgRow) -> Result<ProcessedMessage> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ProcessingStatus>()
        .map_err(AppError::Internal)?;

    Ok(ProcessedMessage {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        content: row.try_get("content")?,
        sender: row.try_get("sender")?,
        metadata: row.try_get("metadata")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
        status,
        error_detail: row.try_get("error_detail")?,
    })
}
