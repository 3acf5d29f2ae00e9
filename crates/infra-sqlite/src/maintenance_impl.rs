// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use shopguard_core::domain::OperationStatus;
use shopguard_core::error::{AppError, Result};
use shopguard_core::port::{Maintenance, MaintenanceStats};
use sqlx::SqlitePool;
use tracing::info;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn pragma(&self, name: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(&format!("PRAGMA {}", name))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", name, e)))
    }

    /// DB size in bytes (page_count * page_size)
    async fn get_db_size_bytes(&self) -> Result<i64> {
        Ok(self.pragma("page_count").await? * self.pragma("page_size").await?)
    }

    async fn count(&self, sql: &str, status: Option<OperationStatus>) -> Result<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }
        query.fetch_one(&self.pool).await.map_err(map_sqlx_error)
    }
}

fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = to_mb(self.get_db_size_bytes().await?);

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = to_mb(self.get_db_size_bytes().await?);
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn gc_completed_operations(
        &self,
        completed_before: i64,
        keep_latest: i64,
    ) -> Result<i64> {
        info!(
            completed_before = completed_before,
            keep_latest = keep_latest,
            "Running completed operation GC"
        );

        // Older than the cutoff, or outside the newest `keep_latest`
        let result = sqlx::query(
            r#"
            DELETE FROM operations
            WHERE status = ?1
            AND (
                completed_at < ?2
                OR seq NOT IN (
                    SELECT seq FROM operations
                    WHERE status = ?1
                    ORDER BY completed_at DESC, seq DESC
                    LIMIT ?3
                )
            )
            "#,
        )
        .bind(OperationStatus::Completed.to_string())
        .bind(completed_before)
        .bind(keep_latest.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Operation GC failed: {}", e)))?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_operations = deleted, "Completed operation GC finished");

        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.get_db_size_bytes().await?;
        let page_count = self.pragma("page_count").await?;
        let freelist_count = self.pragma("freelist_count").await?;

        let operation_count = self.count("SELECT COUNT(*) FROM operations", None).await?;
        let completed_count = self
            .count(
                "SELECT COUNT(*) FROM operations WHERE status = ?",
                Some(OperationStatus::Completed),
            )
            .await?;
        let failed_count = self
            .count(
                "SELECT COUNT(*) FROM operations WHERE status = ?",
                Some(OperationStatus::Failed),
            )
            .await?;
        let flag_count = self.count("SELECT COUNT(*) FROM rollout_flags", None).await?;

        let fragmentation_percent = if page_count > 0 {
            (freelist_count as f64 / page_count as f64) * 100.0
        } else {
            0.0
        };

        Ok(MaintenanceStats {
            db_size_mb: to_mb(db_size_bytes),
            db_size_bytes,
            operation_count,
            completed_count,
            failed_count,
            flag_count,
            fragmentation_percent,
        })
    }
}
