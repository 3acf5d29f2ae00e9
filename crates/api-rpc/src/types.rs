//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};
use shopguard_core::application::{DrainReport, MetricsSnapshot, OutboxStats, QueueStatus};
use shopguard_core::domain::{
    CallerContext, CanaryState, CircuitStatus, QueuedOperation, RolloutFlag, TargetingRule,
};
use shopguard_core::port::MaintenanceStats;

/// queue.enqueue.v1
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub kind: String,
    pub payload: serde_json::Value,
    /// low | medium | high (default medium)
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub operation_id: String,
    pub status: String,
}

/// queue.get.v1, queue.retry.v1, queue.remove.v1
#[derive(Debug, Deserialize)]
pub struct OperationRequest {
    pub operation_id: String,
}

/// queue.status.v1, queue.failed.v1, queue.retry_all.v1, queue.drain.v1,
/// flag.list.v1, admin.stats.v1
#[derive(Debug, Default, Deserialize)]
pub struct EmptyRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct FailedResponse {
    pub operations: Vec<QueuedOperation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryAllResponse {
    pub requeued: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResponse {
    pub operation_id: String,
    pub removed: bool,
}

pub type QueueStatusResponse = QueueStatus;
pub type DrainResponse = DrainReport;

/// circuit.status.v1 (all circuits when `name` is omitted)
#[derive(Debug, Default, Deserialize)]
pub struct CircuitStatusRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatusResponse {
    pub circuits: Vec<CircuitStatus>,
}

/// circuit.reset.v1
#[derive(Debug, Deserialize)]
pub struct CircuitResetRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitResetResponse {
    pub name: String,
    pub reset: bool,
}

/// flag.upsert.v1
#[derive(Debug, Deserialize)]
pub struct FlagUpsertRequest {
    pub name: String,
    pub rollout_percentage: u32,
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagListResponse {
    pub flags: Vec<RolloutFlag>,
}

/// flag.evaluate.v1
#[derive(Debug, Deserialize)]
pub struct FlagEvaluateRequest {
    pub name: String,
    #[serde(default)]
    pub caller: CallerContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagEvaluateResponse {
    pub name: String,
    pub enabled: bool,
}

/// canary.state.v1 (all canaries when `flag` is omitted)
#[derive(Debug, Default, Deserialize)]
pub struct CanaryStateRequest {
    #[serde(default)]
    pub flag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanaryStateResponse {
    pub canaries: Vec<CanaryState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStatus,
    pub open_circuits: usize,
    pub metrics: MetricsSnapshot,
    pub outbox: OutboxStats,
    pub db: MaintenanceStats,
    pub uptime_seconds: u64,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub force_vacuum: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub reclaimed_mb: f64,
    pub db_size_before: i64,
    pub db_size_after: i64,
    pub stats: MaintenanceStats,
}
