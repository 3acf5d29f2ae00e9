//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP, bound to localhost.

use crate::handler::{RpcHandler, RpcServices};
use crate::types::{
    CanaryStateRequest, CircuitResetRequest, CircuitStatusRequest, EnqueueRequest,
    FlagEvaluateRequest, FlagUpsertRequest, MaintenanceRequest, OperationRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use shopguard_core::domain::CanaryConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9531;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// Registers `$name` with typed params (`|handler, req: Type| call`) or none
/// (`|handler| call`)
macro_rules! method {
    ($module:ident, $handler:expr, $name:literal, |$h:ident, $req:ident: $ty:ty| $call:expr) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |params, _, _| {
                let $h = handler.clone();
                async move {
                    let $req: $ty = params.parse()?;
                    $call.await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
    ($module:ident, $handler:expr, $name:literal, |$h:ident| $call:expr) => {{
        let handler = $handler.clone();
        $module
            .register_async_method($name, move |_, _, _| {
                let $h = handler.clone();
                async move { $call.await }
            })
            .map_err(|e| e.to_string())?;
    }};
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, services: RpcServices) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(services)),
        }
    }

    /// Start the JSON-RPC server. Returns the bound address and the server handle.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }

    fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());
        let handler = &self.handler;

        // Delivery queue
        method!(module, handler, "queue.enqueue.v1", |h, req: EnqueueRequest| h.enqueue(req));
        method!(module, handler, "queue.status.v1", |h| h.queue_status());
        method!(module, handler, "queue.failed.v1", |h| h.failed());
        method!(module, handler, "queue.get.v1", |h, req: OperationRequest| h.get_operation(req));
        method!(module, handler, "queue.retry.v1", |h, req: OperationRequest| h.retry(req));
        method!(module, handler, "queue.retry_all.v1", |h| h.retry_all());
        method!(module, handler, "queue.remove.v1", |h, req: OperationRequest| h.remove(req));
        method!(module, handler, "queue.drain.v1", |h| h.drain());

        // Circuits
        method!(module, handler, "circuit.status.v1", |h, req: Option<CircuitStatusRequest>| h
            .circuit_status(req.unwrap_or_default()));
        method!(module, handler, "circuit.reset.v1", |h, req: CircuitResetRequest| h
            .circuit_reset(req));

        // Rollout
        method!(module, handler, "flag.upsert.v1", |h, req: FlagUpsertRequest| h.flag_upsert(req));
        method!(module, handler, "flag.list.v1", |h| h.flag_list());
        method!(module, handler, "flag.evaluate.v1", |h, req: FlagEvaluateRequest| h
            .flag_evaluate(req));
        method!(module, handler, "canary.start.v1", |h, req: CanaryConfig| h.canary_start(req));
        method!(module, handler, "canary.state.v1", |h, req: Option<CanaryStateRequest>| h
            .canary_state(req.unwrap_or_default()));

        // Admin
        method!(module, handler, "admin.stats.v1", |h| h.stats());
        method!(module, handler, "admin.maintenance.v1", |h, req: Option<MaintenanceRequest>| h
            .maintenance(req.unwrap_or_default()));

        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::services;
    use serde_json::{json, Value};
    use shopguard_core::port::dispatcher::mocks::MockDispatcher;

    async fn call(addr: SocketAddr, method: &str, params: Value) -> Value {
        reqwest::Client::new()
            .post(format!("http://{}", addr))
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_over_http() {
        let server = RpcServer::new(
            RpcServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            services(Arc::new(MockDispatcher::new_success()), false),
        );
        let (addr, handle) = server.start().await.unwrap();

        let enqueued = call(
            addr,
            "queue.enqueue.v1",
            json!({"kind": "quote", "payload": {"total": 120}, "priority": "high"}),
        )
        .await;
        assert_eq!(enqueued["result"]["status"], "PENDING");

        let status = call(addr, "queue.status.v1", json!({})).await;
        assert_eq!(status["result"]["pending"], 1);

        let circuits = call(addr, "circuit.status.v1", Value::Null).await;
        assert_eq!(circuits["result"]["circuits"], json!([]));

        let missing = call(addr, "queue.get.v1", json!({"operation_id": "nope"})).await;
        assert_eq!(missing["error"]["code"], 4001);

        handle.stop().unwrap();
    }
}
