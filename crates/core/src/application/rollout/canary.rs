// Canary monitoring: one supervised background task per active canary

use super::RolloutController;
use crate::domain::{CanaryConfig, CanaryPhase, CanaryState, HealthSample};
use crate::error::{AppError, Result};
use crate::port::{ErrorRateFeed, HealthProbe, Notification, ProbeError, TimeProvider};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Rollback reason for a canary whose process died mid-window
const INTERRUPTED_REASON: &str = "interrupted by restart";

/// Why a canary's monitoring window ended without a healthy verdict
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("error rate {rate:.2}% above threshold {threshold:.2}%")]
    ErrorRateExceeded { rate: f64, threshold: f64 },

    #[error("error-rate metric unavailable: {0}")]
    Metrics(String),

    #[error("monitor panicked: {0}")]
    Panicked(String),

    #[error("monitoring deadline exceeded")]
    DeadlineExceeded,

    #[error("monitoring window ended without a health sample")]
    NoSamples,

    #[error("monitoring aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy)]
enum CancelReason {
    Superseded,
    Shutdown,
}

enum Verdict {
    Healthy,
    Unhealthy(MonitorError),
    Superseded,
}

pub(super) struct CanaryEntry {
    state: Arc<Mutex<CanaryState>>,
    cancel: Option<oneshot::Sender<CancelReason>>,
    task: Option<JoinHandle<()>>,
}

fn lock_state(state: &Mutex<CanaryState>) -> MutexGuard<'_, CanaryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RolloutController {
    /// Create `canary_<version>` at the canary percentage and start monitoring it.
    ///
    /// A canary already running on the same flag is cancelled and marked Superseded.
    pub async fn start_canary(self: &Arc<Self>, config: CanaryConfig) -> Result<CanaryState> {
        validate(&config)?;

        let _transition = self.transition.lock().await;
        let flag_name = config.flag_name();
        let now = self.time_provider.now_millis();

        let previous = self.canaries().remove(&flag_name);
        if let Some(mut previous) = previous {
            let superseded = lock_state(&previous.state).finish(
                CanaryPhase::Superseded,
                Some("superseded by a newer canary".to_string()),
                now,
            );
            if let Some(cancel) = previous.cancel.take() {
                let _ = cancel.send(CancelReason::Superseded);
            }
            if superseded {
                let version = lock_state(&previous.state).version.clone();
                info!(flag = %flag_name, version = %version, "Active canary superseded");
                self.outbox.publish(Notification::CanarySuperseded {
                    flag: flag_name.clone(),
                    version,
                });
            }
        }

        self.create_or_update_flag(&flag_name, config.canary_percentage, Vec::new())
            .await?;

        let state = Arc::new(Mutex::new(CanaryState::new(&config, now)));
        let snapshot = lock_state(&state).clone();
        if let Err(e) = self.store.save_canary(&snapshot).await {
            // An unrecorded canary would outlive a crash with nobody watching it
            if let Err(rollback) = self.roll_back_flag(&flag_name).await {
                error!(flag = %flag_name, error = %rollback, "Canary rollback incomplete");
            }
            return Err(e);
        }
        let (cancel_tx, cancel_rx) = oneshot::channel();

        info!(
            flag = %flag_name,
            version = %config.version,
            canary_percentage = config.canary_percentage,
            duration_secs = config.monitoring_duration_secs,
            sample_interval_secs = config.sample_interval_secs,
            "Canary started"
        );

        let task = tokio::spawn(Arc::clone(self).supervise(config, state.clone(), cancel_rx));
        self.canaries().insert(
            flag_name,
            CanaryEntry {
                state,
                cancel: Some(cancel_tx),
                task: Some(task),
            },
        );

        Ok(snapshot)
    }

    /// Rebuild the canary registry from stored records. A record still in Monitoring
    /// belongs to a window that died with the previous process: its flag is rolled
    /// back and the record finished. Returns how many were rolled back.
    pub(super) async fn restore_canaries(&self) -> Result<usize> {
        let _transition = self.transition.lock().await;
        let stored = self.store.list_canaries().await?;

        let mut interrupted = 0;
        for mut state in stored {
            if self.canaries().contains_key(&state.flag_name) {
                continue;
            }

            if !state.phase.is_terminal() {
                if let Err(e) = self.roll_back_flag(&state.flag_name).await {
                    error!(flag = %state.flag_name, error = %e, "Canary rollback incomplete");
                }
                let now = self.time_provider.now_millis();
                state.finish(
                    CanaryPhase::RolledBack,
                    Some(INTERRUPTED_REASON.to_string()),
                    now,
                );
                if let Err(e) = self.store.save_canary(&state).await {
                    warn!(flag = %state.flag_name, error = %e, "Canary outcome not persisted");
                }
                warn!(
                    flag = %state.flag_name,
                    version = %state.version,
                    "Canary interrupted by restart, rolled back"
                );
                self.outbox.publish(Notification::CanaryRolledBack {
                    flag: state.flag_name.clone(),
                    version: state.version.clone(),
                    reason: INTERRUPTED_REASON.to_string(),
                });
                interrupted += 1;
            }

            self.canaries().insert(
                state.flag_name.clone(),
                CanaryEntry {
                    state: Arc::new(Mutex::new(state)),
                    cancel: None,
                    task: None,
                },
            );
        }
        Ok(interrupted)
    }

    pub fn get_canary_state(&self, flag_name: &str) -> Option<CanaryState> {
        self.canaries()
            .get(flag_name)
            .map(|entry| lock_state(&entry.state).clone())
    }

    /// Every canary this controller has run, sorted by start time
    pub fn list_canaries(&self) -> Vec<CanaryState> {
        let mut states: Vec<CanaryState> = self
            .canaries()
            .values()
            .map(|entry| lock_state(&entry.state).clone())
            .collect();
        states.sort_by_key(|s| s.started_at);
        states
    }

    /// Cancel all active canaries (each is rolled back) and wait for them to finish
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .canaries()
            .values_mut()
            .filter_map(|entry| {
                if let Some(cancel) = entry.cancel.take() {
                    let _ = cancel.send(CancelReason::Shutdown);
                }
                entry.task.take()
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Canary task did not finish cleanly");
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        config: CanaryConfig,
        state: Arc<Mutex<CanaryState>>,
        mut cancel_rx: oneshot::Receiver<CancelReason>,
    ) {
        let window = Window {
            probe: self.health_probe.clone(),
            feed: self.error_rate.clone(),
            time_provider: self.time_provider.clone(),
            state: state.clone(),
            config: config.clone(),
            probe_timeout: self.probe_timeout,
        };
        let hard_deadline =
            Duration::from_secs(config.monitoring_duration_secs) + self.probe_timeout;

        // Separate task so a panicking probe cannot take the supervisor down
        let mut monitor = tokio::spawn(async move {
            timeout(hard_deadline, window.run())
                .await
                .unwrap_or(Err(MonitorError::DeadlineExceeded))
        });

        let verdict = tokio::select! {
            joined = &mut monitor => match joined {
                Ok(Ok(())) => Verdict::Healthy,
                Ok(Err(e)) => Verdict::Unhealthy(e),
                Err(join_error) => Verdict::Unhealthy(MonitorError::Panicked(panic_message(join_error))),
            },
            cancel = &mut cancel_rx => {
                monitor.abort();
                match cancel {
                    Ok(CancelReason::Superseded) => Verdict::Superseded,
                    Ok(CancelReason::Shutdown) | Err(_) => {
                        Verdict::Unhealthy(MonitorError::Aborted("shutdown".to_string()))
                    }
                }
            }
        };

        self.finish_canary(&config, &state, verdict).await;
    }

    async fn finish_canary(
        &self,
        config: &CanaryConfig,
        state: &Mutex<CanaryState>,
        verdict: Verdict,
    ) {
        let _transition = self.transition.lock().await;
        let flag_name = config.flag_name();

        if lock_state(state).phase.is_terminal() {
            debug!(flag = %flag_name, "Canary already finished");
            return;
        }

        match verdict {
            Verdict::Superseded => {
                let now = self.time_provider.now_millis();
                lock_state(state).finish(
                    CanaryPhase::Superseded,
                    Some("superseded by a newer canary".to_string()),
                    now,
                );
            }
            Verdict::Healthy => match self.promote_flag(&flag_name).await {
                Ok(_) => {
                    let now = self.time_provider.now_millis();
                    lock_state(state).finish(CanaryPhase::Promoted, None, now);
                    self.record_outcome(state).await;
                    info!(flag = %flag_name, version = %config.version, "Canary promoted");
                    self.outbox.publish(Notification::CanaryPromoted {
                        flag: flag_name,
                        version: config.version.clone(),
                    });
                }
                Err(e) => {
                    self.apply_rollback(config, state, format!("promotion failed: {}", e))
                        .await;
                }
            },
            Verdict::Unhealthy(e) => self.apply_rollback(config, state, e.to_string()).await,
        }
    }

    async fn apply_rollback(&self, config: &CanaryConfig, state: &Mutex<CanaryState>, reason: String) {
        let flag_name = config.flag_name();
        if let Err(e) = self.roll_back_flag(&flag_name).await {
            error!(flag = %flag_name, error = %e, "Canary rollback incomplete");
        }

        let now = self.time_provider.now_millis();
        lock_state(state).finish(CanaryPhase::RolledBack, Some(reason.clone()), now);
        self.record_outcome(state).await;
        warn!(flag = %flag_name, version = %config.version, reason = %reason, "Canary rolled back");
        self.outbox.publish(Notification::CanaryRolledBack {
            flag: flag_name,
            version: config.version.clone(),
            reason,
        });
    }

    async fn record_outcome(&self, state: &Mutex<CanaryState>) {
        let snapshot = lock_state(state).clone();
        if let Err(e) = self.store.save_canary(&snapshot).await {
            warn!(flag = %snapshot.flag_name, error = %e, "Canary outcome not persisted");
        }
    }
}

fn validate(config: &CanaryConfig) -> Result<()> {
    if config.version.trim().is_empty() {
        return Err(AppError::Validation("canary version must not be empty".into()));
    }
    if config.sample_interval_secs == 0 {
        return Err(AppError::Validation("sample interval must be positive".into()));
    }
    if config.monitoring_duration_secs < config.sample_interval_secs {
        return Err(AppError::Validation(format!(
            "monitoring duration {}s is shorter than the sample interval {}s",
            config.monitoring_duration_secs, config.sample_interval_secs
        )));
    }
    let threshold = config.rollback_error_rate_threshold;
    if threshold.is_nan() || threshold < 0.0 {
        return Err(AppError::Validation(
            "rollback error-rate threshold must be a non-negative percentage".into(),
        ));
    }
    Ok(())
}

fn panic_message(join_error: JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let panic_info = join_error.into_panic();
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Inputs of one monitoring window
struct Window {
    probe: Arc<dyn HealthProbe>,
    feed: Arc<dyn ErrorRateFeed>,
    time_provider: Arc<dyn TimeProvider>,
    state: Arc<Mutex<CanaryState>>,
    config: CanaryConfig,
    probe_timeout: Duration,
}

impl Window {
    /// Sample every interval until the window closes; the first unhealthy sample aborts
    async fn run(self) -> std::result::Result<(), MonitorError> {
        let started = Instant::now();
        let interval = Duration::from_secs(self.config.sample_interval_secs);
        let duration = Duration::from_secs(self.config.monitoring_duration_secs);

        let mut offset = interval;
        let mut taken = 0usize;
        while offset <= duration {
            sleep_until(started + offset).await;
            self.sample().await?;
            taken += 1;
            offset += interval;
        }

        if taken == 0 {
            return Err(MonitorError::NoSamples);
        }
        sleep_until(started + duration).await;
        Ok(())
    }

    async fn sample(&self) -> std::result::Result<(), MonitorError> {
        let probe = match timeout(
            self.probe_timeout,
            self.probe.check(&self.config.health_check_target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };
        let error_rate = self
            .feed
            .error_rate()
            .await
            .map_err(|e| MonitorError::Metrics(e.to_string()))?;

        let sample = HealthSample {
            error_rate,
            probe_healthy: probe.is_ok(),
            timestamp: self.time_provider.now_millis(),
        };
        let healthy = sample.is_healthy(self.config.rollback_error_rate_threshold);
        lock_state(&self.state).samples.push(sample);

        debug!(
            flag = %self.config.flag_name(),
            error_rate = error_rate,
            probe_healthy = probe.is_ok(),
            "Canary health sample"
        );

        if let Err(e) = probe {
            return Err(MonitorError::HealthCheckFailed(e.to_string()));
        }
        if !healthy {
            return Err(MonitorError::ErrorRateExceeded {
                rate: error_rate,
                threshold: self.config.rollback_error_rate_threshold,
            });
        }
        Ok(())
    }
}
