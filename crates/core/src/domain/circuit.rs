// Circuit Domain Model (failure isolation state machine)

use serde::{Deserialize, Serialize};

/// Circuit State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Classification of a failed dependency call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CONNECTION_ERROR")]
    ConnectionError,
    #[serde(rename = "5XX")]
    ServerError,
    #[serde(rename = "4XX")]
    ClientError,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Timeout => write!(f, "TIMEOUT"),
            FailureClass::ConnectionError => write!(f, "CONNECTION_ERROR"),
            FailureClass::ServerError => write!(f, "5XX"),
            FailureClass::ClientError => write!(f, "4XX"),
            FailureClass::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Per-dependency circuit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive counted failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit fails fast before allowing a probe
    pub recovery_timeout_ms: i64,
    /// Per-call timeout; expiry is classified as TIMEOUT
    pub call_timeout_ms: u64,
    /// Failure classes that count toward the threshold
    pub retryable: Vec<FailureClass>,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            call_timeout_ms: 10_000,
            retryable: vec![
                FailureClass::Timeout,
                FailureClass::ConnectionError,
                FailureClass::ServerError,
            ],
        }
    }
}

impl CircuitConfig {
    pub fn new(failure_threshold: u32, recovery_timeout_ms: i64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
            ..Self::default()
        }
    }

    /// Ticketing integration: trips early, recovers quickly
    pub fn ticketing() -> Self {
        Self::new(3, 30_000)
    }

    /// Email integration: tolerates bursts, long cooldown
    pub fn email() -> Self {
        Self::new(10, 120_000)
    }

    pub fn counts(&self, class: FailureClass) -> bool {
        self.retryable.contains(&class)
    }
}

/// Admission decision for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call proceeds normally
    Allowed,
    /// Circuit half-open, this call is the single recovery probe
    Probe,
    /// Circuit open (or probe already in flight), fail fast
    Rejected { retry_after_ms: i64 },
}

/// Effect of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failure class not configured as retryable
    Ignored,
    /// Counted, circuit still closed
    Counted,
    /// This failure opened (or re-opened) the circuit
    Opened,
}

/// Circuit Entity
#[derive(Debug, Clone)]
pub struct Circuit {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<i64>, // epoch ms
    pub probe_in_flight: bool,
    pub config: CircuitConfig,
}

impl Circuit {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            probe_in_flight: false,
            config,
        }
    }

    /// Decide whether a call may proceed at `now_millis`.
    ///
    /// The only state change here is Open -> HalfOpen once the recovery timeout has
    /// elapsed; the caller that receives `Admission::Probe` owns the probe slot until
    /// it reports an outcome or abandons the probe.
    pub fn admit(&mut self, now_millis: i64) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let remaining = self.remaining_recovery_ms(now_millis);
                if remaining > 0 {
                    return Admission::Rejected {
                        retry_after_ms: remaining,
                    };
                }
                self.state = CircuitState::HalfOpen;
                self.probe_in_flight = true;
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected { retry_after_ms: 0 }
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful call admitted as `admission`. Returns true if this
    /// success closed a half-open circuit.
    ///
    /// Only the probe may close a half-open circuit. A call admitted while Closed
    /// that finishes after the circuit tripped leaves the state alone.
    pub fn record_success(&mut self, admission: Admission) -> bool {
        match (admission, self.state) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.probe_in_flight = false;
                true
            }
            (_, CircuitState::Closed) => {
                self.consecutive_failures = 0;
                false
            }
            _ => false,
        }
    }

    /// Record a failed call admitted as `admission`, at `now_millis`.
    pub fn record_failure(
        &mut self,
        admission: Admission,
        class: FailureClass,
        now_millis: i64,
    ) -> FailureOutcome {
        if !self.config.counts(class) {
            // The dependency answered; a non-counted error still ends a probe as healthy
            self.record_success(admission);
            return FailureOutcome::Ignored;
        }

        match (admission, self.state) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                self.consecutive_failures += 1;
                self.last_failure_time = Some(now_millis);
                self.probe_in_flight = false;
                self.state = CircuitState::Open;
                FailureOutcome::Opened
            }
            (_, CircuitState::Closed) => {
                self.consecutive_failures += 1;
                self.last_failure_time = Some(now_millis);
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    FailureOutcome::Opened
                } else {
                    FailureOutcome::Counted
                }
            }
            // Admitted before the circuit tripped; the open window is not extended
            _ => FailureOutcome::Counted,
        }
    }

    /// Give the probe slot back without an outcome (probe future dropped).
    ///
    /// The circuit returns to Open with its original failure time, so the next caller
    /// probes immediately.
    pub fn abandon_probe(&mut self) {
        if self.state == CircuitState::HalfOpen && self.probe_in_flight {
            self.state = CircuitState::Open;
            self.probe_in_flight = false;
        }
    }

    /// Force the circuit closed (operator reset)
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        self.last_failure_time = None;
    }

    fn remaining_recovery_ms(&self, now_millis: i64) -> i64 {
        match self.last_failure_time {
            Some(failed_at) => (failed_at + self.config.recovery_timeout_ms - now_millis).max(0),
            None => 0,
        }
    }

    /// Read-only snapshot
    pub fn status(&self, now_millis: i64) -> CircuitStatus {
        let retry_after_ms = match self.state {
            CircuitState::Open => Some(self.remaining_recovery_ms(now_millis)),
            _ => None,
        };

        CircuitStatus {
            name: self.name.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_time: self.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
            retry_after_ms,
        }
    }
}

/// Circuit snapshot exposed to dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<i64>,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: i64,
    pub retry_after_ms: Option<i64>,
}
