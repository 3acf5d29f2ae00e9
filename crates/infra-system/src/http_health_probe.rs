// HTTP health probe for canary targets
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use shopguard_core::port::{HealthProbe, ProbeError};

/// GETs the target URL; any 2xx is healthy
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::Unreachable(format!("HTTP client setup: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, target: &str) -> Result<(), ProbeError> {
        let response = self.client.get(target).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Unreachable(format!("{}: {}", target, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Unhealthy(format!("{} returned HTTP {}", target, status.as_u16())))
        }
    }
}
