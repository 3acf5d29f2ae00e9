//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC parameters to the application services.

use crate::error::to_rpc_error;
use crate::types::{
    CanaryStateRequest, CanaryStateResponse, CircuitResetRequest, CircuitResetResponse,
    CircuitStatusRequest, CircuitStatusResponse, DrainResponse, EnqueueRequest, EnqueueResponse,
    FailedResponse, FlagEvaluateRequest, FlagEvaluateResponse, FlagListResponse,
    FlagUpsertRequest, MaintenanceRequest, MaintenanceResponse, OperationRequest,
    QueueStatusResponse, RemoveResponse, RetryAllResponse, StatsResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use shopguard_core::application::{
    DeliveryQueue, FailureIsolator, MetricsFeed, NotificationOutbox, RolloutController,
};
use shopguard_core::domain::{
    CanaryConfig, CanaryState, CircuitState, OperationKind, OperationPayload, OperationStatus,
    Priority, QueuedOperation, RolloutFlag,
};
use shopguard_core::error::AppError;
use shopguard_core::port::{Maintenance, MaintenanceConfig, TimeProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// Services the handler dispatches to (built by the daemon)
#[derive(Clone)]
pub struct RpcServices {
    pub queue: Arc<DeliveryQueue>,
    pub isolator: Arc<FailureIsolator>,
    pub rollout: Arc<RolloutController>,
    pub metrics: Arc<MetricsFeed>,
    pub outbox: NotificationOutbox,
    pub maintenance: Arc<dyn Maintenance>,
    pub maintenance_config: MaintenanceConfig,
    pub time_provider: Arc<dyn TimeProvider>,
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    services: RpcServices,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(services: RpcServices) -> Self {
        Self {
            services,
            start_time: Instant::now(),
        }
    }

    /// queue.enqueue.v1
    pub async fn enqueue(&self, params: EnqueueRequest) -> RpcResult<EnqueueResponse> {
        let kind: OperationKind = params
            .kind
            .parse()
            .map_err(|e| to_rpc_error(AppError::Domain(e)))?;
        let priority = match params.priority.as_deref() {
            Some(p) => p
                .parse::<Priority>()
                .map_err(|e| to_rpc_error(AppError::Domain(e)))?,
            None => Priority::default(),
        };

        let operation_id = self
            .services
            .queue
            .enqueue(kind, OperationPayload::new(params.payload), priority)
            .await
            .map_err(to_rpc_error)?;

        Ok(EnqueueResponse {
            operation_id,
            status: OperationStatus::Pending.to_string(),
        })
    }

    /// queue.status.v1
    pub async fn queue_status(&self) -> RpcResult<QueueStatusResponse> {
        self.services
            .queue
            .get_queue_status()
            .await
            .map_err(to_rpc_error)
    }

    /// queue.failed.v1
    pub async fn failed(&self) -> RpcResult<FailedResponse> {
        let operations = self
            .services
            .queue
            .get_failed_operations()
            .await
            .map_err(to_rpc_error)?;
        Ok(FailedResponse { operations })
    }

    /// queue.get.v1
    pub async fn get_operation(&self, params: OperationRequest) -> RpcResult<QueuedOperation> {
        self.services
            .queue
            .get_operation(&params.operation_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| {
                to_rpc_error(AppError::NotFound(format!(
                    "Operation {} not found",
                    params.operation_id
                )))
            })
    }

    /// queue.retry.v1
    pub async fn retry(&self, params: OperationRequest) -> RpcResult<QueuedOperation> {
        self.services
            .queue
            .retry_operation(&params.operation_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.retry_all.v1
    pub async fn retry_all(&self) -> RpcResult<RetryAllResponse> {
        let requeued = self
            .services
            .queue
            .retry_all_failed()
            .await
            .map_err(to_rpc_error)?;
        Ok(RetryAllResponse { requeued })
    }

    /// queue.remove.v1
    pub async fn remove(&self, params: OperationRequest) -> RpcResult<RemoveResponse> {
        self.services
            .queue
            .remove_operation(&params.operation_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(RemoveResponse {
            operation_id: params.operation_id,
            removed: true,
        })
    }

    /// queue.drain.v1 - synchronous drain pass
    pub async fn drain(&self) -> RpcResult<DrainResponse> {
        Ok(self.services.queue.drain().await)
    }

    /// circuit.status.v1
    pub async fn circuit_status(
        &self,
        params: CircuitStatusRequest,
    ) -> RpcResult<CircuitStatusResponse> {
        let circuits = match params.name {
            Some(name) => vec![self.services.isolator.get_status(&name)],
            None => self.services.isolator.status_all(),
        };
        Ok(CircuitStatusResponse { circuits })
    }

    /// circuit.reset.v1
    pub async fn circuit_reset(
        &self,
        params: CircuitResetRequest,
    ) -> RpcResult<CircuitResetResponse> {
        let reset = self.services.isolator.reset(&params.name);
        info!(circuit = %params.name, reset = reset, "Circuit reset requested");
        Ok(CircuitResetResponse {
            name: params.name,
            reset,
        })
    }

    /// flag.upsert.v1
    pub async fn flag_upsert(&self, params: FlagUpsertRequest) -> RpcResult<RolloutFlag> {
        self.services
            .rollout
            .create_or_update_flag(&params.name, params.rollout_percentage, params.targeting_rules)
            .await
            .map_err(to_rpc_error)
    }

    /// flag.list.v1
    pub async fn flag_list(&self) -> RpcResult<FlagListResponse> {
        Ok(FlagListResponse {
            flags: self.services.rollout.list_flags().await,
        })
    }

    /// flag.evaluate.v1
    pub async fn flag_evaluate(
        &self,
        params: FlagEvaluateRequest,
    ) -> RpcResult<FlagEvaluateResponse> {
        let enabled = self
            .services
            .rollout
            .is_enabled(&params.name, &params.caller)
            .await;
        Ok(FlagEvaluateResponse {
            name: params.name,
            enabled,
        })
    }

    /// canary.start.v1
    pub async fn canary_start(&self, params: CanaryConfig) -> RpcResult<CanaryState> {
        self.services
            .rollout
            .start_canary(params)
            .await
            .map_err(to_rpc_error)
    }

    /// canary.state.v1
    pub async fn canary_state(&self, params: CanaryStateRequest) -> RpcResult<CanaryStateResponse> {
        let canaries = match params.flag {
            Some(flag) => self
                .services
                .rollout
                .get_canary_state(&flag)
                .into_iter()
                .collect(),
            None => self.services.rollout.list_canaries(),
        };
        Ok(CanaryStateResponse { canaries })
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> RpcResult<StatsResponse> {
        let queue = self
            .services
            .queue
            .get_queue_status()
            .await
            .map_err(to_rpc_error)?;
        let db = self
            .services
            .maintenance
            .get_stats()
            .await
            .map_err(to_rpc_error)?;
        let open_circuits = self
            .services
            .isolator
            .status_all()
            .iter()
            .filter(|c| c.state != CircuitState::Closed)
            .count();

        Ok(StatsResponse {
            queue,
            open_circuits,
            metrics: self.services.metrics.snapshot(),
            outbox: self.services.outbox.stats(),
            db,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// admin.maintenance.v1
    pub async fn maintenance(&self, params: MaintenanceRequest) -> RpcResult<MaintenanceResponse> {
        let maintenance = &self.services.maintenance;
        let stats_before = maintenance.get_stats().await.map_err(to_rpc_error)?;

        // GC + size-triggered VACUUM
        let now = self.services.time_provider.now_millis();
        maintenance
            .run_full_maintenance(&self.services.maintenance_config, now)
            .await
            .map_err(to_rpc_error)?;

        let vacuum_run = params.force_vacuum
            || stats_before.db_size_mb > self.services.maintenance_config.max_db_size_mb;
        if params.force_vacuum {
            maintenance.vacuum().await.map_err(to_rpc_error)?;
        }

        let stats = maintenance.get_stats().await.map_err(to_rpc_error)?;
        let reclaimed_mb = (stats_before.db_size_mb - stats.db_size_mb).max(0.0);

        Ok(MaintenanceResponse {
            vacuum_run,
            reclaimed_mb,
            db_size_before: stats_before.db_size_bytes,
            db_size_after: stats.db_size_bytes,
            stats,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::code;
    use shopguard_core::application::{DeliveryConfig, IsolatorConfig};
    use shopguard_core::port::dispatcher::mocks::MockDispatcher;
    use shopguard_core::port::flag_store::mocks::InMemoryFlagStore;
    use shopguard_core::port::health::mocks::{FixedErrorRate, ScriptedHealthProbe};
    use shopguard_core::port::id_provider::mocks::SequentialIdProvider;
    use shopguard_core::port::maintenance::mocks::MockMaintenance;
    use shopguard_core::port::operation_store::mocks::InMemoryOperationStore;
    use shopguard_core::port::time_provider::mocks::ManualTimeProvider;
    use shopguard_core::port::{DispatchError, DispatchTable, WatchConnectivity};

    pub(crate) fn services(dispatcher: Arc<MockDispatcher>, online: bool) -> RpcServices {
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        let (outbox, _relay) = NotificationOutbox::new(32);
        let metrics = Arc::new(MetricsFeed::new(clock.clone()));
        let isolator = Arc::new(FailureIsolator::new(
            IsolatorConfig::default(),
            metrics.clone(),
            outbox.clone(),
            clock.clone(),
        ));
        let queue = Arc::new(DeliveryQueue::new(
            Arc::new(InMemoryOperationStore::new()),
            isolator.clone(),
            DispatchTable::new().register_all(dispatcher),
            Arc::new(WatchConnectivity::new(online)),
            outbox.clone(),
            Arc::new(SequentialIdProvider::default()),
            clock.clone(),
            DeliveryConfig::default(),
        ));
        let rollout = Arc::new(RolloutController::new(
            Arc::new(InMemoryFlagStore::new()),
            Arc::new(ScriptedHealthProbe::healthy()),
            metrics.clone(),
            outbox.clone(),
            clock.clone(),
        ));
        RpcServices {
            queue,
            isolator,
            rollout,
            metrics,
            outbox,
            maintenance: Arc::new(MockMaintenance::with_db_size(1.0)),
            maintenance_config: MaintenanceConfig::default(),
            time_provider: clock,
        }
    }

    fn enqueue_request(kind: &str, priority: Option<&str>) -> EnqueueRequest {
        EnqueueRequest {
            kind: kind.to_string(),
            payload: serde_json::json!({"device_id": 7}),
            priority: priority.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_enqueue_validates_kind_and_priority() {
        let handler = RpcHandler::new(services(Arc::new(MockDispatcher::new_success()), false));

        let response = handler
            .enqueue(enqueue_request("device", Some("high")))
            .await
            .unwrap();
        assert_eq!(response.status, "PENDING");

        let err = handler
            .enqueue(enqueue_request("teleport", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let err = handler
            .enqueue(enqueue_request("device", Some("urgent")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let status = handler.queue_status().await.unwrap();
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn test_failed_retry_and_remove() {
        let dispatcher = Arc::new(MockDispatcher::new_failing(DispatchError::Server {
            status: 503,
        }));
        let handler = RpcHandler::new(services(dispatcher.clone(), true));
        let id = handler
            .enqueue(enqueue_request("backup", None))
            .await
            .unwrap()
            .operation_id;

        // Not failed yet
        let err = handler
            .retry(OperationRequest {
                operation_id: id.clone(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::CONFLICT);

        let report = handler.drain().await.unwrap();
        assert_eq!(report.attempted, 1);

        let missing = handler
            .get_operation(OperationRequest {
                operation_id: "nope".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(missing.code(), code::NOT_FOUND);

        let removed = handler
            .remove(OperationRequest { operation_id: id })
            .await
            .unwrap();
        assert!(removed.removed);
        assert_eq!(handler.queue_status().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_flags_and_circuits() {
        let handler = RpcHandler::new(services(Arc::new(MockDispatcher::new_success()), false));

        let flag = handler
            .flag_upsert(FlagUpsertRequest {
                name: "new_invoice".into(),
                rollout_percentage: 100,
                targeting_rules: vec![],
            })
            .await
            .unwrap();
        assert!(flag.enabled);

        let err = handler
            .flag_upsert(FlagUpsertRequest {
                name: "new_invoice".into(),
                rollout_percentage: 101,
                targeting_rules: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let evaluated = handler
            .flag_evaluate(FlagEvaluateRequest {
                name: "new_invoice".into(),
                caller: shopguard_core::domain::CallerContext::new("tech-1"),
            })
            .await
            .unwrap();
        assert!(evaluated.enabled);
        assert_eq!(handler.flag_list().await.unwrap().flags.len(), 1);

        let circuits = handler
            .circuit_status(CircuitStatusRequest {
                name: Some("email_service".into()),
            })
            .await
            .unwrap();
        assert_eq!(circuits.circuits[0].state, CircuitState::Closed);
        assert_eq!(circuits.circuits[0].failure_threshold, 10);

        let stats = handler.stats().await.unwrap();
        assert_eq!(stats.open_circuits, 0);
        assert_eq!(stats.db.db_size_mb, 1.0);
    }

    #[tokio::test]
    async fn test_maintenance_force_vacuum() {
        let handler = RpcHandler::new(services(Arc::new(MockDispatcher::new_success()), false));
        let response = handler
            .maintenance(MaintenanceRequest { force_vacuum: true })
            .await
            .unwrap();
        assert!(response.vacuum_run);
    }
}
