// Maintenance Service
// Scheduled housekeeping: purge delivered operations, VACUUM when the DB grows

use crate::application::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceStats, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations (GC, VACUUM) in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    time_provider: Arc<dyn TimeProvider>,
    config: MaintenanceConfig,
    interval: Duration,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `time_provider` - Clock used for the retention cutoff
    /// * `config` - Maintenance configuration
    /// * `interval` - How often to run maintenance
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        time_provider: Arc<dyn TimeProvider>,
        config: MaintenanceConfig,
        interval: Duration,
    ) -> Self {
        Self {
            maintenance,
            time_provider,
            config,
            interval,
        }
    }

    /// Run maintenance loop (background task)
    ///
    /// Runs full maintenance every interval, starting with one pass at startup
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_hours = self.config.completed_retention_hours,
            max_completed = self.config.max_completed_operations,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.run_now().await {
                Ok(stats) => {
                    info!(
                        db_size_mb = stats.db_size_mb,
                        operations = stats.operation_count,
                        completed = stats.completed_count,
                        "Scheduled maintenance completed successfully"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        let now = self.time_provider.now_millis();
        self.maintenance
            .run_full_maintenance(&self.config, now)
            .await
    }
}
