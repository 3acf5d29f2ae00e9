// Retry policy for queued operations
use crate::application::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_RETRY_BASE_DELAY_MS, MAX_RETRY_DELAY_MS,
};
use crate::domain::QueuedOperation;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, operation has failed permanently
    Failed,
}

/// Retry policy
///
/// Decides, after a failed attempt has been recorded, whether the operation goes back
/// to Pending and how long it waits:
/// - Current attempt count
/// - Maximum attempts allowed
/// - Backoff factor for exponential delay
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_ms: i64,
    backoff_factor: f64,
    max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY_MS)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `base_delay_ms` - Delay after the first failed attempt (default: 1000)
    pub fn new(base_delay_ms: i64) -> Self {
        Self {
            base_delay_ms,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: MAX_RETRY_DELAY_MS,
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: i64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Determine if an operation should be retried
    ///
    /// Backoff formula:
    /// delay = base_delay * (backoff_factor ^ (attempts - 1)) * (1.0 ± 0.1), capped
    pub fn should_retry(&self, op: &QueuedOperation) -> RetryDecision {
        if op.attempts_exhausted() {
            warn!(
                operation_id = %op.id,
                attempts = %op.attempts,
                max_attempts = %op.max_attempts,
                "Max delivery attempts reached"
            );
            return RetryDecision::Failed;
        }

        let exponent = op.attempts.saturating_sub(1) as i32;
        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // ±10% jitter, seeded by the operation id so a given operation is deterministic
        let jitter_seed = op.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = ((base_delay_ms * jitter_factor) as i64).clamp(1, self.max_delay_ms);

        info!(
            operation_id = %op.id,
            attempt = %op.attempts,
            max_attempts = %op.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OperationKind, OperationPayload, Priority};

    fn failed_op(attempts: u32, max_attempts: u32) -> QueuedOperation {
        let mut op = QueuedOperation::new(
            "op-retry",
            0,
            OperationKind::Quote,
            OperationPayload::new(serde_json::json!({})),
            Priority::Medium,
            max_attempts,
        );
        op.attempts = attempts;
        op
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::new(1000);
        let RetryDecision::Retry(first) = policy.should_retry(&failed_op(1, 5)) else {
            panic!("expected retry");
        };
        let RetryDecision::Retry(second) = policy.should_retry(&failed_op(2, 5)) else {
            panic!("expected retry");
        };

        assert!((900..=1100).contains(&first));
        assert!((1800..=2200).contains(&second));
        assert!(second > first);
    }

    #[test]
    fn test_exhausted_attempts_fail() {
        let policy = RetryPolicy::new(1000);
        assert_eq!(policy.should_retry(&failed_op(3, 3)), RetryDecision::Failed);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(1000).with_max_delay(5000);
        assert_eq!(
            policy.should_retry(&failed_op(20, 50)),
            RetryDecision::Retry(5000)
        );
    }
}
