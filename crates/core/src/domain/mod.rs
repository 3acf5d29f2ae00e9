// Domain Layer - Pure state machines and entities

pub mod canary;
pub mod circuit;
pub mod error;
pub mod flag;
pub mod operation;

// Re-exports
pub use canary::{CanaryConfig, CanaryPhase, CanaryState, HealthSample};
pub use circuit::{
    Admission, Circuit, CircuitConfig, CircuitState, CircuitStatus, FailureClass, FailureOutcome,
};
pub use error::DomainError;
pub use flag::{CallerContext, RolloutFlag, RuleOperator, TargetingRule};
pub use operation::{
    OperationId, OperationKind, OperationPayload, OperationStatus, Priority, QueuedOperation,
};
