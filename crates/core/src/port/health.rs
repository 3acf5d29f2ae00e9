// Health Ports (canary monitoring inputs)

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Health check failed: {0}")]
    Unhealthy(String),

    #[error("Health target unreachable: {0}")]
    Unreachable(String),

    #[error("Health check timed out")]
    Timeout,

    #[error("Metrics unavailable: {0}")]
    MetricsUnavailable(String),
}

/// Checks a deployment target (health endpoint, service name)
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Ok if the target reports healthy
    async fn check(&self, target: &str) -> Result<(), ProbeError>;
}

/// Global error-rate metric
#[async_trait]
pub trait ErrorRateFeed: Send + Sync {
    /// Current error rate in percent (0-100)
    async fn error_rate(&self) -> Result<f64, ProbeError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted behavior for a single probe call
    #[derive(Debug, Clone)]
    pub enum ProbeBehavior {
        Healthy,
        Unhealthy(String),
        Panic(String),
    }

    /// Pops one behavior per check, then repeats the default
    pub struct ScriptedHealthProbe {
        script: Mutex<VecDeque<ProbeBehavior>>,
        default: ProbeBehavior,
        checks: Mutex<usize>,
    }

    impl ScriptedHealthProbe {
        pub fn healthy() -> Self {
            Self::new(Vec::new(), ProbeBehavior::Healthy)
        }

        pub fn new(script: Vec<ProbeBehavior>, default: ProbeBehavior) -> Self {
            Self {
                script: Mutex::new(script.into()),
                default,
                checks: Mutex::new(0),
            }
        }

        pub fn check_count(&self) -> usize {
            *self.checks.lock().unwrap()
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedHealthProbe {
        async fn check(&self, _target: &str) -> Result<(), ProbeError> {
            *self.checks.lock().unwrap() += 1;
            let behavior = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default.clone());

            match behavior {
                ProbeBehavior::Healthy => Ok(()),
                ProbeBehavior::Unhealthy(msg) => Err(ProbeError::Unhealthy(msg)),
                ProbeBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }

    /// Fixed error rate, adjustable from the test
    pub struct FixedErrorRate {
        rate: Mutex<Result<f64, ProbeError>>,
    }

    impl FixedErrorRate {
        pub fn new(rate: f64) -> Self {
            Self {
                rate: Mutex::new(Ok(rate)),
            }
        }

        pub fn set(&self, rate: Result<f64, ProbeError>) {
            *self.rate.lock().unwrap() = rate;
        }
    }

    #[async_trait]
    impl ErrorRateFeed for FixedErrorRate {
        async fn error_rate(&self) -> Result<f64, ProbeError> {
            self.rate.lock().unwrap().clone()
        }
    }
}
