// Queued Operation Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Operation ID (UUID v4)
pub type OperationId = String;

/// Operation kind (each kind is dispatched through its own circuit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Diagnostic,
    Device,
    Backup,
    Report,
    Client,
    Quote,
    Appointment,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Diagnostic,
        OperationKind::Device,
        OperationKind::Backup,
        OperationKind::Report,
        OperationKind::Client,
        OperationKind::Quote,
        OperationKind::Appointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Diagnostic => "diagnostic",
            OperationKind::Device => "device",
            OperationKind::Backup => "backup",
            OperationKind::Report => "report",
            OperationKind::Client => "client",
            OperationKind::Quote => "quote",
            OperationKind::Appointment => "appointment",
        }
    }

    /// Circuit guarding this kind's backend calls
    pub fn circuit_name(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}

/// Priority band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Numeric rank used for store ordering (higher = drained first)
    pub fn rank(&self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }

    pub fn from_rank(rank: i32) -> Result<Self> {
        match rank {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            other => Err(DomainError::InvalidPriority(other.to_string())),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(DomainError::InvalidPriority(other.to_string())),
        }
    }
}

/// Operation Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "PENDING"),
            OperationStatus::Processing => write!(f, "PROCESSING"),
            OperationStatus::Completed => write!(f, "COMPLETED"),
            OperationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OperationStatus::Pending),
            "PROCESSING" => Ok(OperationStatus::Processing),
            "COMPLETED" => Ok(OperationStatus::Completed),
            "FAILED" => Ok(OperationStatus::Failed),
            other => Err(DomainError::ValidationError(format!(
                "unknown operation status: {}",
                other
            ))),
        }
    }
}

/// Operation Payload (JSON serializable mutation body)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload(serde_json::Value);

impl OperationPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Queued Operation Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub payload: OperationPayload,
    pub priority: Priority,
    pub status: OperationStatus,

    pub enqueued_at: i64, // epoch ms
    pub updated_at: i64,
    pub completed_at: Option<i64>,

    // Retry bookkeeping
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Option<i64>, // backoff gate, None = due now
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Create a new pending operation
    ///
    /// # Arguments
    ///
    /// * `id` - Unique operation ID (injected, not generated)
    /// * `enqueued_at` - Enqueue timestamp in epoch ms (injected, not system time)
    /// * `kind` - Operation kind (selects dispatcher and circuit)
    /// * `payload` - Mutation body
    /// * `priority` - Priority band
    /// * `max_attempts` - Automatic attempt budget
    pub fn new(
        id: impl Into<String>,
        enqueued_at: i64,
        kind: OperationKind,
        payload: OperationPayload,
        priority: Priority,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
            priority,
            status: OperationStatus::Pending,
            enqueued_at,
            updated_at: enqueued_at,
            completed_at: None,
            attempts: 0,
            max_attempts,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Whether a drain pass at `now_millis` may pick this operation up
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.status == OperationStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now_millis)
    }

    /// Pending -> Processing
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        self.transition(OperationStatus::Pending, OperationStatus::Processing)?;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Processing -> Completed
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        self.transition(OperationStatus::Processing, OperationStatus::Completed)?;
        self.updated_at = now_millis;
        self.completed_at = Some(now_millis);
        self.next_attempt_at = None;
        self.last_error = None;
        Ok(())
    }

    /// Count a failed delivery attempt. Returns the new attempt count.
    pub fn record_attempt_failure(&mut self, error: impl Into<String>, now_millis: i64) -> u32 {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = now_millis;
        self.attempts
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Processing -> Pending, due again at `next_attempt_at`
    pub fn reschedule(&mut self, next_attempt_at: i64, now_millis: i64) -> Result<()> {
        self.transition(OperationStatus::Processing, OperationStatus::Pending)?;
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Processing -> Failed (attempt budget exhausted)
    pub fn fail_permanently(&mut self, now_millis: i64) -> Result<()> {
        self.transition(OperationStatus::Processing, OperationStatus::Failed)?;
        self.next_attempt_at = None;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Failed -> Pending (manual retry). Cumulative attempts are preserved.
    pub fn reset_for_retry(&mut self, now_millis: i64) -> Result<()> {
        self.transition(OperationStatus::Failed, OperationStatus::Pending)?;
        self.next_attempt_at = None;
        self.updated_at = now_millis;
        Ok(())
    }

    fn transition(&mut self, from: OperationStatus, to: OperationStatus) -> Result<()> {
        if self.status != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
