// SQLite OperationStore Implementation

use crate::error::{corrupt_column, map_sqlx_error};
use async_trait::async_trait;
use shopguard_core::domain::{
    OperationId, OperationPayload, OperationStatus, Priority, QueuedOperation,
};
use shopguard_core::error::{AppError, Result};
use shopguard_core::port::OperationStore;
use sqlx::SqlitePool;

pub struct SqliteOperationStore {
    pool: SqlitePool,
}

impl SqliteOperationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationStore for SqliteOperationStore {
    async fn insert(&self, op: &QueuedOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (
                id, kind, payload, priority_rank, status,
                enqueued_at, updated_at, completed_at,
                attempts, max_attempts, next_attempt_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&op.id)
        .bind(op.kind.as_str())
        .bind(op.payload.as_value().to_string())
        .bind(op.priority.rank())
        .bind(op.status.to_string())
        .bind(op.enqueued_at)
        .bind(op.updated_at)
        .bind(op.completed_at)
        .bind(i64::from(op.attempts))
        .bind(i64::from(op.max_attempts))
        .bind(op.next_attempt_at)
        .bind(&op.last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let row = sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(OperationRow::into_operation).transpose()
    }

    async fn update(&self, op: &QueuedOperation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = ?, updated_at = ?, completed_at = ?,
                attempts = ?, next_attempt_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(op.status.to_string())
        .bind(op.updated_at)
        .bind(op.completed_at)
        .bind(i64::from(op.attempts))
        .bind(op.next_attempt_at)
        .bind(&op.last_error)
        .bind(&op.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(op.id.clone()));
        }
        Ok(())
    }

    async fn claim_next(&self, now_millis: i64) -> Result<Option<QueuedOperation>> {
        // Single statement: the select and the state change cannot interleave
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            UPDATE operations
            SET status = ?, updated_at = ?
            WHERE seq = (
                SELECT seq FROM operations
                WHERE status = ?
                AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
                ORDER BY priority_rank DESC, enqueued_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(OperationStatus::Processing.to_string())
        .bind(now_millis)
        .bind(OperationStatus::Pending.to_string())
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(OperationRow::into_operation).transpose()
    }

    async fn count_by_status(&self, status: OperationStatus) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM operations WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT * FROM operations
            WHERE status = ?
            ORDER BY priority_rank DESC, enqueued_at ASC, seq ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    async fn delete(&self, id: &OperationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM operations WHERE id = ? AND status != ?")
            .bind(id)
            .bind(OperationStatus::Processing.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue_processing(&self, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = ?, next_attempt_at = NULL, updated_at = ?
            WHERE status = ?
            "#,
        )
        .bind(OperationStatus::Pending.to_string())
        .bind(now_millis)
        .bind(OperationStatus::Processing.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: String,
    kind: String,
    payload: String,
    priority_rank: i32,
    status: String,
    enqueued_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    attempts: i64,
    max_attempts: i64,
    next_attempt_at: Option<i64>,
    last_error: Option<String>,
}

impl OperationRow {
    fn into_operation(self) -> Result<QueuedOperation> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let attempts =
            u32::try_from(self.attempts).map_err(|_| corrupt_column("attempts", self.attempts))?;
        let max_attempts = u32::try_from(self.max_attempts)
            .map_err(|_| corrupt_column("max_attempts", self.max_attempts))?;

        Ok(QueuedOperation {
            id: self.id,
            kind: self.kind.parse()?,
            payload: OperationPayload::new(payload),
            priority: Priority::from_rank(self.priority_rank)?,
            status: self.status.parse()?,
            enqueued_at: self.enqueued_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            attempts,
            max_attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
        })
    }
}
