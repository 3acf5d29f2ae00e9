// Application constants (no magic values)
use std::time::Duration;

/// Default automatic attempt budget per operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Exponential backoff factor between attempts
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound for a single retry delay (5 minutes)
pub const MAX_RETRY_DELAY_MS: i64 = 5 * 60 * 1000;

/// Shortest deferral when a circuit rejects an operation (half-open probe in flight)
pub const MIN_OPEN_CIRCUIT_DEFERRAL_MS: i64 = 1000;

/// Periodic flush interval for the delivery runner (30 seconds)
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Sliding window for the global error-rate metric (5 minutes)
pub const DEFAULT_METRICS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Cap on retained call outcomes in the metrics window
pub const METRICS_MAX_SAMPLES: usize = 10_000;

/// Timeout for a single canary health probe (10 seconds)
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
