// Failure Isolator (per-dependency circuit breaking)

use crate::application::metrics::MetricsFeed;
use crate::application::outbox::NotificationOutbox;
use crate::domain::{Admission, Circuit, CircuitConfig, CircuitStatus, FailureOutcome};
use crate::port::{DispatchError, Notification, TimeProvider};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Dependency names with preset circuit configuration
pub const TICKETING_SERVICE: &str = "ticketing_service";
pub const EMAIL_SERVICE: &str = "email_service";

/// Error returned by `FailureIsolator::execute`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Fail-fast rejection; the wrapped call was never made
    #[error("Circuit '{circuit}' is open (retry after {retry_after_ms}ms)")]
    CircuitOpen {
        circuit: String,
        retry_after_ms: i64,
    },

    /// The wrapped call failed (re-raised unchanged)
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl CallError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }
}

/// Circuit configuration per dependency name
#[derive(Debug, Clone)]
pub struct IsolatorConfig {
    pub default: CircuitConfig,
    pub overrides: HashMap<String, CircuitConfig>,
}

impl Default for IsolatorConfig {
    fn default() -> Self {
        Self {
            default: CircuitConfig::default(),
            overrides: HashMap::new(),
        }
        .with_override(TICKETING_SERVICE, CircuitConfig::ticketing())
        .with_override(EMAIL_SERVICE, CircuitConfig::email())
    }
}

impl IsolatorConfig {
    pub fn with_override(mut self, name: impl Into<String>, config: CircuitConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    pub fn config_for(&self, name: &str) -> CircuitConfig {
        self.overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Circuit breaker over named dependencies.
///
/// Admission and outcome recording each run under the circuit table lock; the call
/// itself runs outside it, so a slow dependency never blocks other circuits.
pub struct FailureIsolator {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: IsolatorConfig,
    metrics: Arc<MetricsFeed>,
    outbox: NotificationOutbox,
    time_provider: Arc<dyn TimeProvider>,
}

impl FailureIsolator {
    pub fn new(
        config: IsolatorConfig,
        metrics: Arc<MetricsFeed>,
        outbox: NotificationOutbox,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
            metrics,
            outbox,
            time_provider,
        }
    }

    /// Run `op` through the named circuit.
    ///
    /// The call is bounded by the circuit's call timeout; expiry surfaces as
    /// `DispatchError::Timeout`. Failures are re-raised after the circuit is updated.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let now = self.time_provider.now_millis();
        let (admission, call_timeout_ms) = {
            let mut circuits = self.lock();
            let circuit = self.circuit_entry(&mut circuits, name);
            (circuit.admit(now), circuit.config.call_timeout_ms)
        };

        match admission {
            Admission::Rejected { retry_after_ms } => {
                debug!(circuit = name, retry_after_ms = retry_after_ms, "Circuit open, failing fast");
                return Err(CallError::CircuitOpen {
                    circuit: name.to_string(),
                    retry_after_ms,
                });
            }
            Admission::Probe => info!(circuit = name, "Circuit half-open, probing dependency"),
            Admission::Allowed => {}
        }

        let mut probe = ProbeGuard {
            isolator: self,
            name,
            armed: admission == Admission::Probe,
        };

        let result = match tokio::time::timeout(Duration::from_millis(call_timeout_ms), op()).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        };
        probe.armed = false;

        match result {
            Ok(value) => {
                self.on_success(name, admission);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(name, admission, &e);
                Err(CallError::Dispatch(e))
            }
        }
    }

    fn on_success(&self, name: &str, admission: Admission) {
        let recovered = self
            .circuit_entry(&mut self.lock(), name)
            .record_success(admission);
        self.metrics.record_success();
        if recovered {
            info!(circuit = name, "Circuit closed, dependency recovered");
        }
    }

    fn on_failure(&self, name: &str, admission: Admission, error: &DispatchError) {
        let now = self.time_provider.now_millis();
        let class = error.class();
        let (outcome, consecutive_failures) = {
            let mut circuits = self.lock();
            let circuit = self.circuit_entry(&mut circuits, name);
            let outcome = circuit.record_failure(admission, class, now);
            (outcome, circuit.consecutive_failures)
        };

        match outcome {
            FailureOutcome::Ignored => {
                debug!(circuit = name, class = %class, error = %error, "Failure not counted");
            }
            FailureOutcome::Counted => {
                self.metrics.record_failure();
                warn!(
                    circuit = name,
                    class = %class,
                    consecutive_failures = consecutive_failures,
                    error = %error,
                    "Dependency call failed"
                );
            }
            FailureOutcome::Opened => {
                self.metrics.record_failure();
                warn!(
                    circuit = name,
                    class = %class,
                    consecutive_failures = consecutive_failures,
                    "Circuit opened"
                );
                self.outbox.publish(Notification::CircuitOpened {
                    circuit: name.to_string(),
                    consecutive_failures,
                });
            }
        }
    }

    /// Read-only snapshot; unknown names report a fresh closed circuit
    pub fn get_status(&self, name: &str) -> CircuitStatus {
        let now = self.time_provider.now_millis();
        match self.lock().get(name) {
            Some(circuit) => circuit.status(now),
            None => Circuit::new(name, self.config.config_for(name)).status(now),
        }
    }

    /// Snapshots of every circuit that has seen traffic, sorted by name
    pub fn status_all(&self) -> Vec<CircuitStatus> {
        let now = self.time_provider.now_millis();
        let mut statuses: Vec<CircuitStatus> =
            self.lock().values().map(|c| c.status(now)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Force a circuit closed. Returns false if the circuit was never used.
    pub fn reset(&self, name: &str) -> bool {
        match self.lock().get_mut(name) {
            Some(circuit) => {
                circuit.reset();
                info!(circuit = name, "Circuit reset by operator");
                true
            }
            None => false,
        }
    }

    fn circuit_entry<'a>(
        &self,
        circuits: &'a mut HashMap<String, Circuit>,
        name: &str,
    ) -> &'a mut Circuit {
        circuits
            .entry(name.to_string())
            .or_insert_with(|| Circuit::new(name, self.config.config_for(name)))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the half-open probe slot if the probing future is dropped mid-call
struct ProbeGuard<'a> {
    isolator: &'a FailureIsolator,
    name: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(circuit) = self.isolator.lock().get_mut(self.name) {
                circuit.abandon_probe();
            }
            debug!(circuit = self.name, "Probe abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CircuitState;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        isolator: Arc<FailureIsolator>,
        clock: Arc<ManualTimeProvider>,
        metrics: Arc<MetricsFeed>,
        outbox: NotificationOutbox,
        _relay: crate::application::outbox::OutboxRelay,
    }

    fn fixture(config: IsolatorConfig) -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        let metrics = Arc::new(MetricsFeed::new(clock.clone()));
        let (outbox, relay) = NotificationOutbox::new(16);
        let isolator = Arc::new(FailureIsolator::new(
            config,
            metrics.clone(),
            outbox.clone(),
            clock.clone(),
        ));
        Fixture {
            isolator,
            clock,
            metrics,
            outbox,
            _relay: relay,
        }
    }

    async fn fail_with(
        isolator: &FailureIsolator,
        name: &str,
        error: DispatchError,
        calls: &AtomicUsize,
    ) -> Result<(), CallError> {
        isolator
            .execute(name, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(error)
            })
            .await
    }

    #[tokio::test]
    async fn test_email_circuit_opens_and_fails_fast() {
        let config =
            IsolatorConfig::default().with_override(EMAIL_SERVICE, CircuitConfig::new(3, 120_000));
        let f = fixture(config);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let err = fail_with(&f.isolator, EMAIL_SERVICE, DispatchError::Timeout, &calls)
                .await
                .unwrap_err();
            assert_eq!(err, CallError::Dispatch(DispatchError::Timeout));
        }
        assert_eq!(f.isolator.get_status(EMAIL_SERVICE).state, CircuitState::Open);

        let err = fail_with(&f.isolator, EMAIL_SERVICE, DispatchError::Timeout, &calls)
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.outbox.stats().published, 1);
    }

    #[tokio::test]
    async fn test_probe_after_recovery_timeout() {
        let f = fixture(IsolatorConfig::default().with_override("crm", CircuitConfig::new(1, 5_000)));
        let calls = AtomicUsize::new(0);

        let _ = fail_with(&f.isolator, "crm", DispatchError::Server { status: 503 }, &calls).await;
        f.clock.advance(5_000);

        let value = f
            .isolator
            .execute("crm", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DispatchError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let status = f.isolator.get_status("crm");
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let f = fixture(IsolatorConfig::default().with_override("crm", CircuitConfig::new(1, 5_000)));
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let err = fail_with(&f.isolator, "crm", DispatchError::Client { status: 422 }, &calls)
                .await
                .unwrap_err();
            assert_eq!(err, CallError::Dispatch(DispatchError::Client { status: 422 }));
        }
        assert_eq!(f.isolator.get_status("crm").state, CircuitState::Closed);
        assert_eq!(f.metrics.snapshot().calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_classified() {
        let mut slow = CircuitConfig::new(1, 5_000);
        slow.call_timeout_ms = 100;
        let f = fixture(IsolatorConfig::default().with_override("slow", slow));

        let err = f
            .isolator
            .execute("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DispatchError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err, CallError::Dispatch(DispatchError::Timeout));
        assert_eq!(f.isolator.get_status("slow").state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_are_all_counted() {
        let f = fixture(
            IsolatorConfig::default().with_override("backend", CircuitConfig::new(50, 60_000)),
        );

        let mut handles = Vec::new();
        for _ in 0..20 {
            let isolator = f.isolator.clone();
            handles.push(tokio::spawn(async move {
                isolator
                    .execute("backend", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<(), _>(DispatchError::Connection("reset".into()))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert_eq!(f.isolator.get_status("backend").consecutive_failures, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_tripped_circuit() {
        let f = fixture(IsolatorConfig::default().with_override("crm", CircuitConfig::new(1, 60_000)));
        let calls = AtomicUsize::new(0);

        let isolator = f.isolator.clone();
        let slow = tokio::spawn(async move {
            isolator
                .execute("crm", || async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, DispatchError>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let _ = fail_with(&f.isolator, "crm", DispatchError::Timeout, &calls).await;
        assert_eq!(f.isolator.get_status("crm").state, CircuitState::Open);

        assert!(slow.await.unwrap().is_ok());
        let status = f.isolator.get_status("crm");
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_steal_probe() {
        let f = fixture(IsolatorConfig::default().with_override("crm", CircuitConfig::new(1, 1_000)));
        let calls = AtomicUsize::new(0);

        let isolator = f.isolator.clone();
        let straggler = tokio::spawn(async move {
            isolator
                .execute("crm", || async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Err::<(), _>(DispatchError::Connection("reset".into()))
                })
                .await
        });
        tokio::task::yield_now().await;

        let _ = fail_with(&f.isolator, "crm", DispatchError::Timeout, &calls).await;
        f.clock.advance(1_000);

        let isolator = f.isolator.clone();
        let probe = tokio::spawn(async move {
            isolator
                .execute("crm", || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, DispatchError>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(f.isolator.get_status("crm").state, CircuitState::HalfOpen);

        assert!(straggler.await.unwrap().is_err());
        assert_eq!(f.isolator.get_status("crm").state, CircuitState::HalfOpen);
        let rejected = f
            .isolator
            .execute("crm", || async { Ok::<_, DispatchError>(()) })
            .await;
        assert!(rejected.unwrap_err().is_circuit_open());

        assert!(probe.await.unwrap().is_ok());
        assert_eq!(f.isolator.get_status("crm").state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let f = fixture(IsolatorConfig::default().with_override("crm", CircuitConfig::new(1, 1_000)));
        let calls = AtomicUsize::new(0);
        let _ = fail_with(&f.isolator, "crm", DispatchError::Timeout, &calls).await;
        f.clock.advance(1_000);

        let probe = f.isolator.execute("crm", || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, DispatchError>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), probe).await;

        let result = f
            .isolator
            .execute("crm", || async { Ok::<_, DispatchError>(()) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_status_is_read_only_and_reset_closes() {
        let f = fixture(IsolatorConfig::default());
        let calls = AtomicUsize::new(0);
        assert!(!f.isolator.reset(TICKETING_SERVICE));

        for _ in 0..3 {
            let _ = fail_with(&f.isolator, TICKETING_SERVICE, DispatchError::Timeout, &calls).await;
        }
        f.clock.advance(60_000);

        let first = f.isolator.get_status(TICKETING_SERVICE);
        let second = f.isolator.get_status(TICKETING_SERVICE);
        assert_eq!(first, second);
        assert_eq!(first.state, CircuitState::Open);
        assert_eq!(first.failure_threshold, 3);

        assert!(f.isolator.reset(TICKETING_SERVICE));
        assert_eq!(f.isolator.get_status(TICKETING_SERVICE).state, CircuitState::Closed);
        assert_eq!(f.isolator.status_all().len(), 1);
    }
}
