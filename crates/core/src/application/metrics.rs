// Shared call metrics (feeds circuit dashboards and canary monitoring)

use crate::application::constants::{DEFAULT_METRICS_WINDOW_MS, METRICS_MAX_SAMPLES};
use crate::port::{ErrorRateFeed, ProbeError, TimeProvider};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: i64,
    failed: bool,
}

/// Snapshot of the current window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub window_ms: i64,
    pub calls: u64,
    pub failures: u64,
    /// Percent (0-100)
    pub error_rate: f64,
    pub total_calls: u64,
    pub total_failures: u64,
}

#[derive(Default)]
struct Window {
    outcomes: VecDeque<Outcome>,
    total_calls: u64,
    total_failures: u64,
}

/// Sliding-window success/failure counter over every isolated dependency call
pub struct MetricsFeed {
    window: Mutex<Window>,
    window_ms: i64,
    time_provider: Arc<dyn TimeProvider>,
}

impl MetricsFeed {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self::with_window(time_provider, DEFAULT_METRICS_WINDOW_MS)
    }

    pub fn with_window(time_provider: Arc<dyn TimeProvider>, window_ms: i64) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            window_ms,
            time_provider,
        }
    }

    pub fn record_success(&self) {
        self.record(false);
    }

    pub fn record_failure(&self) {
        self.record(true);
    }

    fn record(&self, failed: bool) {
        let now = self.time_provider.now_millis();
        let mut window = self.lock();
        window.total_calls += 1;
        if failed {
            window.total_failures += 1;
        }
        window.outcomes.push_back(Outcome { at: now, failed });
        if window.outcomes.len() > METRICS_MAX_SAMPLES {
            window.outcomes.pop_front();
        }
        Self::evict(&mut window, now - self.window_ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.time_provider.now_millis();
        let mut window = self.lock();
        Self::evict(&mut window, now - self.window_ms);

        let calls = window.outcomes.len() as u64;
        let failures = window.outcomes.iter().filter(|o| o.failed).count() as u64;
        let error_rate = if calls == 0 {
            0.0
        } else {
            failures as f64 * 100.0 / calls as f64
        };

        MetricsSnapshot {
            window_ms: self.window_ms,
            calls,
            failures,
            error_rate,
            total_calls: window.total_calls,
            total_failures: window.total_failures,
        }
    }

    /// Error rate in percent over the window (0 when idle)
    pub fn current_error_rate(&self) -> f64 {
        self.snapshot().error_rate
    }

    fn evict(window: &mut Window, cutoff: i64) {
        while window.outcomes.front().is_some_and(|o| o.at < cutoff) {
            window.outcomes.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ErrorRateFeed for MetricsFeed {
    async fn error_rate(&self) -> Result<f64, ProbeError> {
        Ok(self.current_error_rate())
    }
}
