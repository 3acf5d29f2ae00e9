// Operation Dispatcher Port
// One async backend call per operation kind, always invoked through the isolator

use crate::domain::{FailureClass, OperationKind, QueuedOperation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Dependency call errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Client error: HTTP {status}")]
    Client { status: u16 },

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl DispatchError {
    pub fn class(&self) -> FailureClass {
        match self {
            DispatchError::Timeout => FailureClass::Timeout,
            DispatchError::Connection(_) => FailureClass::ConnectionError,
            DispatchError::Server { .. } => FailureClass::ServerError,
            DispatchError::Client { .. } => FailureClass::ClientError,
            DispatchError::Rejected(_) => FailureClass::Unknown,
        }
    }

    /// Map an HTTP status to an error (None for 2xx/3xx)
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            500..=599 => Some(DispatchError::Server { status }),
            400..=499 => Some(DispatchError::Client { status }),
            _ => None,
        }
    }
}

/// Backend call for one operation
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(&self, op: &QueuedOperation) -> Result<(), DispatchError>;
}

/// Kind -> dispatcher mapping
#[derive(Clone, Default)]
pub struct DispatchTable {
    dispatchers: HashMap<OperationKind, Arc<dyn OperationDispatcher>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: OperationKind, dispatcher: Arc<dyn OperationDispatcher>) -> Self {
        self.dispatchers.insert(kind, dispatcher);
        self
    }

    /// Route every kind to the same dispatcher
    pub fn register_all(mut self, dispatcher: Arc<dyn OperationDispatcher>) -> Self {
        for kind in OperationKind::ALL {
            self.dispatchers.insert(kind, dispatcher.clone());
        }
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn OperationDispatcher>> {
        self.dispatchers.get(&kind).cloned()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted dispatcher: pops one outcome per call, then falls back to the default
    pub struct MockDispatcher {
        script: Mutex<VecDeque<Result<(), DispatchError>>>,
        default: Mutex<Result<(), DispatchError>>,
        delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockDispatcher {
        pub fn new_success() -> Self {
            Self::with_default(Ok(()))
        }

        pub fn new_failing(error: DispatchError) -> Self {
            Self::with_default(Err(error))
        }

        fn with_default(default: Result<(), DispatchError>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default: Mutex::new(default),
                delay: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Queue outcomes for the next calls
        pub fn push(&self, outcome: Result<(), DispatchError>) {
            self.script.lock().unwrap().push_back(outcome);
        }

        pub fn set_default(&self, outcome: Result<(), DispatchError>) {
            *self.default.lock().unwrap() = outcome;
        }

        /// Sleep before answering (tokio time, so paused clocks apply)
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        /// Operation IDs in call order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OperationDispatcher for MockDispatcher {
        async fn dispatch(&self, op: &QueuedOperation) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push(op.id.clone());

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.default.lock().unwrap().clone())
        }
    }
}
