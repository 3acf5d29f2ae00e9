//! Shared wiring: core services over real SQLite stores, scripted ports

#![allow(dead_code)]

use std::sync::Arc;

use shopguard_core::application::{
    DeliveryConfig, DeliveryQueue, FailureIsolator, IsolatorConfig, MetricsFeed,
    NotificationOutbox, OutboxRelay,
};
use shopguard_core::port::dispatcher::mocks::MockDispatcher;
use shopguard_core::port::id_provider::mocks::SequentialIdProvider;
use shopguard_core::port::time_provider::mocks::ManualTimeProvider;
use shopguard_core::port::{DispatchTable, WatchConnectivity};
use shopguard_infra_sqlite::{create_pool, run_migrations, SqliteOperationStore};
use sqlx::SqlitePool;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub async fn memory_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn file_pool(path: &std::path::Path) -> SqlitePool {
    let url = shopguard_infra_sqlite::database_url(path).unwrap();
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub struct Harness {
    pub queue: Arc<DeliveryQueue>,
    pub isolator: Arc<FailureIsolator>,
    pub store: Arc<SqliteOperationStore>,
    pub dispatcher: Arc<MockDispatcher>,
    pub connectivity: Arc<WatchConnectivity>,
    pub clock: Arc<ManualTimeProvider>,
    pub outbox: NotificationOutbox,
    pub relay: Option<OutboxRelay>,
}

impl Harness {
    pub fn new(pool: SqlitePool, online: bool, isolator_config: IsolatorConfig) -> Self {
        Self::with_ids(pool, online, isolator_config, "op")
    }

    /// Distinct id prefixes keep ids unique across simulated restarts
    pub fn with_ids(
        pool: SqlitePool,
        online: bool,
        isolator_config: IsolatorConfig,
        id_prefix: &str,
    ) -> Self {
        let clock = Arc::new(ManualTimeProvider::new(START_MILLIS));
        let store = Arc::new(SqliteOperationStore::new(pool));
        let dispatcher = Arc::new(MockDispatcher::new_success());
        let connectivity = Arc::new(WatchConnectivity::new(online));
        let (outbox, relay) = NotificationOutbox::new(64);
        let isolator = Arc::new(FailureIsolator::new(
            isolator_config,
            Arc::new(MetricsFeed::new(clock.clone())),
            outbox.clone(),
            clock.clone(),
        ));
        let queue = Arc::new(DeliveryQueue::new(
            store.clone(),
            isolator.clone(),
            DispatchTable::new().register_all(dispatcher.clone()),
            connectivity.clone(),
            outbox.clone(),
            Arc::new(SequentialIdProvider::with_prefix(id_prefix)),
            clock.clone(),
            DeliveryConfig::default(),
        ));
        Self {
            queue,
            isolator,
            store,
            dispatcher,
            connectivity,
            clock,
            outbox,
            relay: Some(relay),
        }
    }
}
