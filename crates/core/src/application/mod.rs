// Application Layer - Use Cases and Business Logic

pub mod constants;
pub mod delivery;
pub mod isolator;
pub mod maintenance;
pub mod metrics;
pub mod outbox;
pub mod recovery;
pub mod retry;
pub mod rollout;
pub mod shutdown;

// Re-exports
pub use delivery::{DeliveryConfig, DeliveryQueue, DeliveryRunner, DrainReport, QueueStatus};
pub use isolator::{CallError, FailureIsolator, IsolatorConfig, EMAIL_SERVICE, TICKETING_SERVICE};
pub use maintenance::MaintenanceScheduler;
pub use metrics::{MetricsFeed, MetricsSnapshot};
pub use outbox::{NotificationOutbox, OutboxRelay, OutboxStats};
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use rollout::{stable_bucket, MonitorError, RolloutController};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
