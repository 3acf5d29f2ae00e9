// Crash recovery logic
use crate::domain::OperationStatus;
use crate::port::{OperationStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Crash recovery service
///
/// On daemon startup, returns operations that were mid-delivery when the process died
/// to Pending. Delivery is at-least-once: the backend sees the same idempotency key
/// again for these.
pub struct RecoveryService {
    store: Arc<dyn OperationStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn OperationStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
        }
    }

    /// Requeue interrupted operations
    ///
    /// # Returns
    /// Number of operations recovered
    pub async fn recover_interrupted_operations(&self) -> crate::error::Result<u64> {
        let interrupted = self.store.count_by_status(OperationStatus::Processing).await?;
        if interrupted == 0 {
            info!("No interrupted operations to recover");
            return Ok(0);
        }

        warn!(count = interrupted, "Found operations interrupted mid-delivery");
        let now = self.time_provider.now_millis();
        let recovered = self.store.requeue_processing(now).await?;

        info!(recovered_count = recovered, "Interrupted operation recovery complete");
        Ok(recovered)
    }
}
