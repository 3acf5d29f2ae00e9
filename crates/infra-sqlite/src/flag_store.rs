// SQLite FlagStore Implementation

use crate::error::{corrupt_column, map_sqlx_error};
use async_trait::async_trait;
use shopguard_core::domain::{CanaryState, HealthSample, RolloutFlag, TargetingRule};
use shopguard_core::error::Result;
use shopguard_core::port::FlagStore;
use sqlx::SqlitePool;

pub struct SqliteFlagStore {
    pool: SqlitePool,
}

impl SqliteFlagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn upsert(&self, flag: &RolloutFlag) -> Result<()> {
        let rules = serde_json::to_string(&flag.targeting_rules)?;

        sqlx::query(
            r#"
            INSERT INTO rollout_flags (
                name, enabled, rollout_percentage, targeting_rules, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                enabled = excluded.enabled,
                rollout_percentage = excluded.rollout_percentage,
                targeting_rules = excluded.targeting_rules,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&flag.name)
        .bind(flag.enabled)
        .bind(i64::from(flag.rollout_percentage))
        .bind(rules)
        .bind(flag.created_at)
        .bind(flag.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Option<RolloutFlag>> {
        let row = sqlx::query_as::<_, FlagRow>("SELECT * FROM rollout_flags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(FlagRow::into_flag).transpose()
    }

    async fn list(&self) -> Result<Vec<RolloutFlag>> {
        let rows: Vec<FlagRow> = sqlx::query_as("SELECT * FROM rollout_flags ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(FlagRow::into_flag).collect()
    }

    async fn save_canary(&self, state: &CanaryState) -> Result<()> {
        let samples = serde_json::to_string(&state.samples)?;

        sqlx::query(
            r#"
            INSERT INTO canaries (
                flag_name, version, phase, started_at, finished_at, reason, samples
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(flag_name) DO UPDATE SET
                version = excluded.version,
                phase = excluded.phase,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                reason = excluded.reason,
                samples = excluded.samples
            "#,
        )
        .bind(&state.flag_name)
        .bind(&state.version)
        .bind(state.phase.to_string())
        .bind(state.started_at)
        .bind(state.finished_at)
        .bind(&state.reason)
        .bind(samples)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_canaries(&self) -> Result<Vec<CanaryState>> {
        let rows: Vec<CanaryRow> =
            sqlx::query_as("SELECT * FROM canaries ORDER BY started_at, flag_name")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(CanaryRow::into_state).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlagRow {
    name: String,
    enabled: bool,
    rollout_percentage: i64,
    targeting_rules: String,
    created_at: i64,
    updated_at: i64,
}

impl FlagRow {
    fn into_flag(self) -> Result<RolloutFlag> {
        let targeting_rules: Vec<TargetingRule> = serde_json::from_str(&self.targeting_rules)?;
        let rollout_percentage = u8::try_from(self.rollout_percentage)
            .ok()
            .filter(|pct| *pct <= 100)
            .ok_or_else(|| corrupt_column("rollout_percentage", self.rollout_percentage))?;

        Ok(RolloutFlag {
            name: self.name,
            enabled: self.enabled,
            rollout_percentage,
            targeting_rules,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CanaryRow {
    flag_name: String,
    version: String,
    phase: String,
    started_at: i64,
    finished_at: Option<i64>,
    reason: Option<String>,
    samples: String,
}

impl CanaryRow {
    fn into_state(self) -> Result<CanaryState> {
        let samples: Vec<HealthSample> = serde_json::from_str(&self.samples)?;

        Ok(CanaryState {
            flag_name: self.flag_name,
            version: self.version,
            phase: self.phase.parse()?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            samples,
            reason: self.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use shopguard_core::domain::{CanaryConfig, CanaryPhase};

    async fn store() -> SqliteFlagStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteFlagStore::new(pool)
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = store().await;
        let flag = RolloutFlag::new(
            "new_invoice",
            25,
            vec![TargetingRule::equals("shop", "north")],
            1_000,
        )
        .unwrap();
        store.upsert(&flag).await.unwrap();

        assert_eq!(store.find("new_invoice").await.unwrap(), Some(flag));
        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_keeps_created_at() {
        let store = store().await;
        let mut flag = RolloutFlag::new("canary_2.4.0", 10, vec![], 1_000).unwrap();
        store.upsert(&flag).await.unwrap();

        flag.roll_back(5_000);
        store.upsert(&flag).await.unwrap();

        let flags = store.list().await.unwrap();
        assert_eq!(flags.len(), 1);
        assert!(!flags[0].enabled);
        assert_eq!(flags[0].rollout_percentage, 0);
        assert_eq!(flags[0].created_at, 1_000);
        assert_eq!(flags[0].updated_at, 5_000);
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let store = store().await;
        for name in ["zeta", "alpha", "mid"] {
            store
                .upsert(&RolloutFlag::new(name, 50, vec![], 1).unwrap())
                .await
                .unwrap();
        }
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_canary_record_replaced_per_flag() {
        let store = store().await;
        let config = CanaryConfig::new("2.4.0", "http://localhost/health");
        let mut state = CanaryState::new(&config, 1_000);
        store.save_canary(&state).await.unwrap();

        state.samples.push(HealthSample {
            error_rate: 0.5,
            probe_healthy: true,
            timestamp: 31_000,
        });
        state.finish(CanaryPhase::RolledBack, Some("error rate".into()), 40_000);
        store.save_canary(&state).await.unwrap();

        let later = CanaryState::new(&CanaryConfig::new("2.5.0", "t"), 2_000);
        store.save_canary(&later).await.unwrap();

        let canaries = store.list_canaries().await.unwrap();
        assert_eq!(canaries, vec![state, later]);
        assert_eq!(canaries[1].phase, CanaryPhase::Monitoring);
        assert!(canaries[1].finished_at.is_none());
    }
}
