// Connectivity monitor: periodic backend reachability poll
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use shopguard_core::application::ShutdownToken;
use shopguard_core::port::WatchConnectivity;

/// Feeds a `WatchConnectivity` from HTTP reachability of a URL.
///
/// Any HTTP response counts as online; only transport failures mean offline.
pub struct ConnectivityMonitor {
    client: Client,
    url: String,
    poll_interval: Duration,
    connectivity: Arc<WatchConnectivity>,
}

impl ConnectivityMonitor {
    pub fn new(
        url: impl Into<String>,
        poll_interval: Duration,
        probe_timeout: Duration,
        connectivity: Arc<WatchConnectivity>,
    ) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(probe_timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            poll_interval,
            connectivity,
        })
    }

    /// Probe once and publish the result. Returns the observed state.
    pub async fn poll_once(&self) -> bool {
        let online = match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.url, error = %e, "Reachability probe failed");
                false
            }
        };
        self.connectivity.set_online(online);
        online
    }

    /// Run loop (background task)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            url = %self.url,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Connectivity monitor started"
        );

        let mut tick = interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tick.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("Connectivity monitor stopped");
    }
}
