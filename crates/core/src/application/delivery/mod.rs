// Delivery Queue - durable offline queue replayed through the failure isolator

mod runner;

pub use runner::DeliveryRunner;

use crate::application::constants::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS,
    MIN_OPEN_CIRCUIT_DEFERRAL_MS,
};
use crate::application::isolator::{CallError, FailureIsolator};
use crate::application::outbox::NotificationOutbox;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    OperationId, OperationKind, OperationPayload, OperationStatus, Priority, QueuedOperation,
};
use crate::error::{AppError, Result};
use crate::port::{
    ConnectivitySource, DispatchTable, IdProvider, Notification, OperationStore, TimeProvider,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Delivery queue configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Automatic attempt budget for new operations
    pub max_attempts: u32,
    pub retry_base_delay_ms: i64,
    /// Periodic drain interval for the runner
    pub flush_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Per-status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// What a single drain pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Pass skipped because the backend is unreachable
    pub skipped_offline: bool,
    pub attempted: usize,
    pub completed: usize,
    /// Failed attempt, back to Pending with backoff
    pub retried: usize,
    /// Attempt budget exhausted
    pub failed: usize,
    /// Circuit open, rescheduled without consuming an attempt
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryOutcome {
    Completed,
    Retried,
    Failed,
    Deferred,
}

impl DrainReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Completed => self.completed += 1,
            DeliveryOutcome::Retried => self.retried += 1,
            DeliveryOutcome::Failed => self.failed += 1,
            DeliveryOutcome::Deferred => self.deferred += 1,
        }
    }
}

/// Durable, priority-ordered queue of state-changing operations
pub struct DeliveryQueue {
    store: Arc<dyn OperationStore>,
    isolator: Arc<FailureIsolator>,
    dispatchers: DispatchTable,
    connectivity: Arc<dyn ConnectivitySource>,
    outbox: NotificationOutbox,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: RetryPolicy,
    config: DeliveryConfig,
    drain_lock: Mutex<()>,
    drain_requested: Notify,
}

impl DeliveryQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OperationStore>,
        isolator: Arc<FailureIsolator>,
        dispatchers: DispatchTable,
        connectivity: Arc<dyn ConnectivitySource>,
        outbox: NotificationOutbox,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            isolator,
            dispatchers,
            connectivity,
            outbox,
            id_provider,
            time_provider,
            retry_policy: RetryPolicy::new(config.retry_base_delay_ms),
            config,
            drain_lock: Mutex::new(()),
            drain_requested: Notify::new(),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Persist a new operation. Never touches the network.
    ///
    /// When online, an immediate drain is requested from the runner.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        payload: OperationPayload,
        priority: Priority,
    ) -> Result<OperationId> {
        let id = self.id_provider.generate_id();
        let now = self.time_provider.now_millis();
        let op = QueuedOperation::new(
            id.clone(),
            now,
            kind,
            payload,
            priority,
            self.config.max_attempts,
        );

        self.store.insert(&op).await?;
        info!(operation_id = %id, kind = %kind, priority = %priority, "Operation enqueued");

        if self.connectivity.is_online() {
            self.request_drain();
        }
        Ok(id)
    }

    /// Wake the runner for an out-of-schedule drain
    pub fn request_drain(&self) {
        self.drain_requested.notify_one();
    }

    /// Resolves once a drain has been requested
    pub async fn drain_requested(&self) {
        self.drain_requested.notified().await;
    }

    /// Deliver every due Pending operation.
    ///
    /// Never fails: per-operation outcomes become operation status and store errors
    /// end the pass early (they are logged). Passes are serialized.
    pub async fn drain(&self) -> DrainReport {
        let _pass = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain");
            report.skipped_offline = true;
            return report;
        }

        // Anything rescheduled during this pass is due strictly after pass_started
        let pass_started = self.time_provider.now_millis();

        loop {
            let op = match self.store.claim_next(pass_started).await {
                Ok(Some(op)) => op,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to claim next operation");
                    break;
                }
            };

            report.attempted += 1;
            let operation_id = op.id.clone();
            match self.deliver(op).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    // Left in Processing; recovered on next startup
                    error!(operation_id = %operation_id, error = %e, "Failed to record delivery outcome");
                }
            }

            if !self.connectivity.is_online() {
                info!("Connectivity lost during drain, stopping pass");
                break;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                deferred = report.deferred,
                "Drain pass finished"
            );
        }
        report
    }

    async fn deliver(&self, mut op: QueuedOperation) -> Result<DeliveryOutcome> {
        let Some(dispatcher) = self.dispatchers.get(op.kind) else {
            let reason = format!("no dispatcher registered for kind '{}'", op.kind);
            return self.record_failed_attempt(op, reason).await;
        };

        let result = self
            .isolator
            .execute(op.kind.circuit_name(), || dispatcher.dispatch(&op))
            .await;
        let now = self.time_provider.now_millis();

        match result {
            Ok(()) => {
                op.complete(now)?;
                self.store.update(&op).await?;
                info!(operation_id = %op.id, kind = %op.kind, attempt = op.attempts + 1, "Operation delivered");
                Ok(DeliveryOutcome::Completed)
            }
            Err(CallError::CircuitOpen { retry_after_ms, .. }) => {
                let next_attempt_at = now + retry_after_ms.max(MIN_OPEN_CIRCUIT_DEFERRAL_MS);
                op.reschedule(next_attempt_at, now)?;
                self.store.update(&op).await?;
                debug!(
                    operation_id = %op.id,
                    kind = %op.kind,
                    next_attempt_at = next_attempt_at,
                    "Circuit open, operation deferred"
                );
                Ok(DeliveryOutcome::Deferred)
            }
            Err(CallError::Dispatch(e)) => self.record_failed_attempt(op, e.to_string()).await,
        }
    }

    async fn record_failed_attempt(
        &self,
        mut op: QueuedOperation,
        reason: String,
    ) -> Result<DeliveryOutcome> {
        let now = self.time_provider.now_millis();
        op.record_attempt_failure(reason, now);

        match self.retry_policy.should_retry(&op) {
            RetryDecision::Retry(delay_ms) => {
                op.reschedule(now + delay_ms, now)?;
                self.store.update(&op).await?;
                warn!(
                    operation_id = %op.id,
                    kind = %op.kind,
                    attempt = op.attempts,
                    error = op.last_error.as_deref().unwrap_or_default(),
                    "Delivery attempt failed, will retry"
                );
                Ok(DeliveryOutcome::Retried)
            }
            RetryDecision::Failed => {
                op.fail_permanently(now)?;
                self.store.update(&op).await?;
                error!(
                    operation_id = %op.id,
                    kind = %op.kind,
                    attempts = op.attempts,
                    error = op.last_error.as_deref().unwrap_or_default(),
                    "Operation failed permanently"
                );
                self.outbox.publish(Notification::OperationFailed {
                    operation_id: op.id.clone(),
                    kind: op.kind,
                    attempts: op.attempts,
                    last_error: op.last_error.clone(),
                });
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Delete an operation that is not currently being delivered
    pub async fn remove_operation(&self, id: &OperationId) -> Result<()> {
        // The store refuses Processing rows in the same statement, so a concurrent
        // claim cannot slip between the check and the delete
        if !self.store.delete(id).await? {
            self.find_existing(id).await?;
            return Err(AppError::InvalidState(format!(
                "operation {} is being delivered",
                id
            )));
        }
        info!(operation_id = %id, "Operation removed");
        Ok(())
    }

    /// Failed -> Pending, keeping cumulative attempts, then request a drain
    pub async fn retry_operation(&self, id: &OperationId) -> Result<QueuedOperation> {
        let mut op = self.find_existing(id).await?;
        if op.status != OperationStatus::Failed {
            return Err(AppError::InvalidState(format!(
                "operation {} is {}, only FAILED operations can be retried",
                id, op.status
            )));
        }

        op.reset_for_retry(self.time_provider.now_millis())?;
        self.store.update(&op).await?;
        info!(operation_id = %id, attempts = op.attempts, "Operation queued for manual retry");

        self.request_drain();
        Ok(op)
    }

    /// Retry every Failed operation. Returns how many were requeued.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let failed = self.store.find_by_status(OperationStatus::Failed).await?;
        let now = self.time_provider.now_millis();

        let mut count = 0;
        for mut op in failed {
            op.reset_for_retry(now)?;
            self.store.update(&op).await?;
            count += 1;
        }

        if count > 0 {
            info!(count = count, "Failed operations queued for manual retry");
            self.request_drain();
        }
        Ok(count)
    }

    pub async fn get_queue_status(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            pending: self.store.count_by_status(OperationStatus::Pending).await?,
            processing: self.store.count_by_status(OperationStatus::Processing).await?,
            completed: self.store.count_by_status(OperationStatus::Completed).await?,
            failed: self.store.count_by_status(OperationStatus::Failed).await?,
        })
    }

    pub async fn get_failed_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.store.find_by_status(OperationStatus::Failed).await
    }

    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        self.store.find_by_id(id).await
    }

    async fn find_existing(&self, id: &OperationId) -> Result<QueuedOperation> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", id)))
    }
}
