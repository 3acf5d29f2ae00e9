// Port Layer - Interfaces for external dependencies

pub mod connectivity;
pub mod dispatcher;
pub mod flag_store;
pub mod health;
pub mod id_provider; // For deterministic testing
pub mod maintenance;
pub mod notifier;
pub mod operation_store;
pub mod time_provider;

// Re-exports
pub use connectivity::{ConnectivitySource, WatchConnectivity};
pub use dispatcher::{DispatchError, DispatchTable, OperationDispatcher};
pub use flag_store::FlagStore;
pub use health::{ErrorRateFeed, HealthProbe, ProbeError};
pub use id_provider::{IdProvider, UuidProvider};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use notifier::{Notification, Notifier, NotifyError};
pub use operation_store::OperationStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
