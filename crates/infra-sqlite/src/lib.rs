// ShopGuard Infrastructure - SQLite Adapter
// Implements: OperationStore, FlagStore, Maintenance

mod connection;
mod error;
mod flag_store;
mod maintenance_impl;
mod migration;
mod operation_store;

pub use connection::{create_pool, database_url};
pub use flag_store::SqliteFlagStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use operation_store::SqliteOperationStore;

// sqlx::Error conversion is handled by error::map_sqlx_error
// (orphan rules forbid From<sqlx::Error> for AppError here)
