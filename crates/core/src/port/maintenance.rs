// DB Maintenance port
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Database maintenance statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub operation_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub flag_count: i64,
    pub fragmentation_percent: f64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Completed operations older than this are purged (hours)
    pub completed_retention_hours: i64,

    /// Newest completed operations kept regardless of age
    pub max_completed_operations: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            completed_retention_hours: 24,
            max_completed_operations: 1000,
            max_db_size_mb: 200.0,
        }
    }
}

/// Database maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space and optimize DB
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete Completed operations that are older than `completed_before` or fall
    /// outside the newest `keep_latest`
    ///
    /// # Returns
    /// Number of operations deleted
    async fn gc_completed_operations(&self, completed_before: i64, keep_latest: i64)
        -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (GC + VACUUM when large)
    async fn run_full_maintenance(
        &self,
        config: &MaintenanceConfig,
        now_millis: i64,
    ) -> Result<MaintenanceStats> {
        // 1. Get pre-maintenance stats
        let stats_before = self.get_stats().await?;

        // 2. GC completed operations
        let cutoff = now_millis - config.completed_retention_hours * 3_600_000;
        let deleted_operations = self
            .gc_completed_operations(cutoff, config.max_completed_operations)
            .await?;

        // 3. VACUUM if DB is large
        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        // 4. Get post-maintenance stats
        let stats_after = self.get_stats().await?;

        tracing::info!(
            deleted_operations = deleted_operations,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records GC cutoffs; reports a fixed DB size
    #[derive(Default)]
    pub struct MockMaintenance {
        pub db_size_mb: f64,
        gc_calls: Mutex<Vec<(i64, i64)>>,
        vacuums: Mutex<usize>,
    }

    impl MockMaintenance {
        pub fn with_db_size(db_size_mb: f64) -> Self {
            Self {
                db_size_mb,
                ..Self::default()
            }
        }

        pub fn gc_calls(&self) -> Vec<(i64, i64)> {
            self.gc_calls.lock().unwrap().clone()
        }

        pub fn vacuum_count(&self) -> usize {
            *self.vacuums.lock().unwrap()
        }
    }

    #[async_trait]
    impl Maintenance for MockMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            *self.vacuums.lock().unwrap() += 1;
            Ok(1.0)
        }

        async fn gc_completed_operations(
            &self,
            completed_before: i64,
            keep_latest: i64,
        ) -> Result<i64> {
            self.gc_calls
                .lock()
                .unwrap()
                .push((completed_before, keep_latest));
            Ok(0)
        }

        async fn get_stats(&self) -> Result<MaintenanceStats> {
            Ok(MaintenanceStats {
                db_size_mb: self.db_size_mb,
                ..MaintenanceStats::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockMaintenance;
    use super::*;

    #[tokio::test]
    async fn test_full_maintenance_cutoff_and_vacuum() {
        let small = MockMaintenance::with_db_size(10.0);
        let config = MaintenanceConfig::default();
        small
            .run_full_maintenance(&config, 100 * 3_600_000)
            .await
            .unwrap();

        assert_eq!(small.gc_calls(), vec![(76 * 3_600_000, 1000)]);
        assert_eq!(small.vacuum_count(), 0);

        let large = MockMaintenance::with_db_size(500.0);
        large.run_full_maintenance(&config, 0).await.unwrap();
        assert_eq!(large.vacuum_count(), 1);
    }
}
