// Delivery Runner - background drain loop

use super::DeliveryQueue;
use crate::application::shutdown::ShutdownToken;
use crate::port::ConnectivitySource;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drains the queue on request, on a became-online edge, and on a flush interval
pub struct DeliveryRunner {
    queue: Arc<DeliveryQueue>,
    connectivity: Arc<dyn ConnectivitySource>,
    flush_interval: Duration,
}

impl DeliveryRunner {
    pub fn new(queue: Arc<DeliveryQueue>, connectivity: Arc<dyn ConnectivitySource>) -> Self {
        let flush_interval = queue.config().flush_interval;
        Self {
            queue,
            connectivity,
            flush_interval,
        }
    }

    /// Run loop (background task); the first flush tick fires immediately
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            flush_interval_secs = self.flush_interval.as_secs(),
            "Delivery runner started"
        );

        let mut online = self.connectivity.subscribe();
        let mut source_open = true;
        let mut tick = interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let trigger = tokio::select! {
                _ = shutdown.wait() => break,
                _ = self.queue.drain_requested() => "requested",
                changed = online.changed(), if source_open => match changed {
                    Ok(()) => {
                        if !*online.borrow_and_update() {
                            debug!("Connectivity lost");
                            continue;
                        }
                        "connectivity_restored"
                    }
                    Err(_) => {
                        warn!("Connectivity source closed, relying on flush interval");
                        source_open = false;
                        continue;
                    }
                },
                _ = tick.tick() => "interval",
            };

            let report = self.queue.drain().await;
            debug!(
                trigger = trigger,
                attempted = report.attempted,
                skipped_offline = report.skipped_offline,
                "Drain triggered"
            );
        }

        info!("Delivery runner stopped");
    }
}
