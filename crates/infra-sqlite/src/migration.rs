// Migration Runner

use shopguard_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Database(format!("migration failed: {}", e))
}

/// Versioned schema steps, applied in order
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "operations queue", include_str!("../migrations/001_operations.sql")),
    (2, "rollout flags", include_str!("../migrations/002_rollout_flags.sql")),
    (3, "canaries", include_str!("../migrations/003_canaries.sql")),
];

/// Bring the schema up to the latest version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = schema_version(pool).await?;
    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(version, _, _)| *version > current_version)
        .collect();

    if pending.is_empty() {
        info!(version = current_version, "Schema up to date");
        return Ok(());
    }

    for (version, name, sql) in pending {
        info!(version = version, name = name, "Applying migration");
        apply_migration(pool, sql).await?;
    }
    Ok(())
}

async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
    Ok(version.unwrap_or(0))
}

/// One migration file, statement by statement, in a single transaction
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    for statement in sql.split(';').map(strip_comments) {
        if statement.is_empty() {
            continue;
        }
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)
}

fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
