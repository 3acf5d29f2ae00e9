//! JSON-RPC API Layer
//!
//! Admin surface of the ShopGuard daemon: delivery queue, circuits, rollout
//! flags, canaries and database maintenance.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::{RpcHandler, RpcServices};
pub use server::{RpcServer, RpcServerConfig};
