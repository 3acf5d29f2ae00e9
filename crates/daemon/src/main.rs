//! ShopGuard daemon - composition root
//!
//! Wires the SQLite stores, host adapters and application services, then serves
//! the JSON-RPC admin surface until Ctrl+C.

mod config;
mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shopguard_api_rpc::{RpcServer, RpcServerConfig, RpcServices};
use shopguard_core::application::{
    shutdown_channel, DeliveryQueue, DeliveryRunner, FailureIsolator, IsolatorConfig,
    MaintenanceScheduler, MetricsFeed, NotificationOutbox, RecoveryService, RolloutController,
};
use shopguard_core::port::{
    DispatchTable, Notifier, OperationStore, SystemTimeProvider, UuidProvider, WatchConnectivity,
};
use shopguard_infra_sqlite::{
    create_pool, database_url, run_migrations, SqliteFlagStore, SqliteMaintenance,
    SqliteOperationStore,
};
use shopguard_infra_system::{
    ConnectivityMonitor, HttpDispatcher, HttpHealthProbe, TracingNotifier, WebhookNotifier,
};

use crate::config::DaemonConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration + logging
    let config = DaemonConfig::load()?;
    let _log_guard = logging::init(&config.log_format, config.log_dir.as_deref())?;

    info!("ShopGuard v{} starting...", shopguard_core::VERSION);

    // 2. Database
    let db_path = config.db_path();
    info!(db_path = %db_path.display(), "Initializing database...");
    let pool = create_pool(&database_url(&db_path)?)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Shared infrastructure
    let time_provider = Arc::new(SystemTimeProvider);
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut background = Vec::new();

    let (outbox, relay) = NotificationOutbox::new(config.outbox_capacity);
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.request_timeout())?),
        None => Arc::new(TracingNotifier),
    };
    background.push(tokio::spawn(relay.run(notifier, shutdown_rx.clone())));

    let metrics = Arc::new(MetricsFeed::new(time_provider.clone()));
    let isolator = Arc::new(FailureIsolator::new(
        IsolatorConfig::default(),
        metrics.clone(),
        outbox.clone(),
        time_provider.clone(),
    ));

    // 4. Crash recovery: interrupted deliveries go back to Pending
    let store: Arc<dyn OperationStore> = Arc::new(SqliteOperationStore::new(pool.clone()));
    match RecoveryService::new(store.clone(), time_provider.clone())
        .recover_interrupted_operations()
        .await
    {
        Ok(count) => info!(recovered_operations = count, "Crash recovery completed"),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 5. Connectivity + delivery queue
    let connectivity = Arc::new(WatchConnectivity::new(false));
    let monitor = ConnectivityMonitor::new(
        config.connectivity_url(),
        Duration::from_secs(config.connectivity_poll_secs),
        config.request_timeout(),
        connectivity.clone(),
    )?;
    background.push(tokio::spawn(monitor.run(shutdown_rx.clone())));

    let dispatcher = Arc::new(HttpDispatcher::new(
        config.backend_url.clone(),
        config.request_timeout(),
    )?);
    let queue = Arc::new(DeliveryQueue::new(
        store,
        isolator.clone(),
        DispatchTable::new().register_all(dispatcher),
        connectivity.clone(),
        outbox.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
        config.delivery(),
    ));
    let runner = DeliveryRunner::new(queue.clone(), connectivity);
    background.push(tokio::spawn(runner.run(shutdown_rx.clone())));

    // 6. Rollout flags + canaries
    let rollout = Arc::new(RolloutController::new(
        Arc::new(SqliteFlagStore::new(pool.clone())),
        Arc::new(HttpHealthProbe::new(config.request_timeout())?),
        metrics.clone(),
        outbox.clone(),
        time_provider.clone(),
    ));
    rollout.load().await.context("Loading rollout flags failed")?;

    // 7. Maintenance
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone()));
    let scheduler = MaintenanceScheduler::new(
        maintenance.clone(),
        time_provider.clone(),
        config.maintenance(),
        config.maintenance_interval(),
    );
    background.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

    // 8. JSON-RPC server
    let services = RpcServices {
        queue,
        isolator,
        rollout: rollout.clone(),
        metrics,
        outbox,
        maintenance,
        maintenance_config: config.maintenance(),
        time_provider,
    };
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, services)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(rpc_addr = %rpc_addr, backend = %config.backend_url, "System ready");
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown: canaries first (they may still write flags)
    rollout.shutdown().await;
    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    for handle in background {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
