// Notifier Port (fire-and-forget alerts)

use crate::domain::OperationKind;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Alert and outcome events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CircuitOpened {
        circuit: String,
        consecutive_failures: u32,
    },
    OperationFailed {
        operation_id: String,
        kind: OperationKind,
        attempts: u32,
        last_error: Option<String>,
    },
    CanaryPromoted {
        flag: String,
        version: String,
    },
    CanaryRolledBack {
        flag: String,
        version: String,
        reason: String,
    },
    /// Replaced by a newer canary on the same flag before reaching a verdict
    CanarySuperseded {
        flag: String,
        version: String,
    },
}

impl Notification {
    /// One-line human summary
    pub fn summary(&self) -> String {
        match self {
            Notification::CircuitOpened {
                circuit,
                consecutive_failures,
            } => format!(
                "Circuit '{}' opened after {} consecutive failures",
                circuit, consecutive_failures
            ),
            Notification::OperationFailed {
                operation_id,
                kind,
                attempts,
                ..
            } => format!(
                "Operation {} ({}) failed permanently after {} attempts",
                operation_id, kind, attempts
            ),
            Notification::CanaryPromoted { version, .. } => {
                format!("Canary {} promoted to 100%", version)
            }
            Notification::CanaryRolledBack {
                version, reason, ..
            } => format!("Canary {} rolled back: {}", version, reason),
            Notification::CanarySuperseded { version, .. } => {
                format!("Canary {} superseded by a newer canary", version)
            }
        }
    }

    pub fn is_alert(&self) -> bool {
        !matches!(
            self,
            Notification::CanaryPromoted { .. } | Notification::CanarySuperseded { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Keeps every delivered notification
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("mock sink down".into()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }
}
