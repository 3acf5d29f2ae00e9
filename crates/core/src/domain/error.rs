// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid operation state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown operation kind: {0}")]
    UnknownKind(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Rollout percentage out of range: {0} (expected 0-100)")]
    InvalidPercentage(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
