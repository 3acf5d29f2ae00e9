// Notifier adapters: structured log sink and webhook
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use shopguard_core::port::{Notification, Notifier, NotifyError};

/// Writes notifications to the log (alerts at WARN)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let summary = notification.summary();
        if notification.is_alert() {
            warn!(notification = ?notification, "{}", summary);
        } else {
            info!(notification = ?notification, "{}", summary);
        }
        Ok(())
    }
}

/// POSTs each notification as JSON (`{"type": ..., "summary": ..., ...}`)
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotifyError::Unavailable(format!("HTTP client setup: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut body = serde_json::to_value(notification)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("summary".into(), notification.summary().into());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{closed_address, serve};

    fn rolled_back() -> Notification {
        Notification::CanaryRolledBack {
            flag: "canary_2.4.0".into(),
            version: "2.4.0".into(),
            reason: "health check failed".into(),
        }
    }

    #[tokio::test]
    async fn test_tracing_notifier_never_fails() {
        assert!(TracingNotifier.notify(&rolled_back()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_posts_tagged_json() {
        let (url, mut requests) = serve(204).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();

        notifier.notify(&rolled_back()).await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.contains(r#""type":"canary_rolled_back""#));
        assert!(request.contains("Canary 2.4.0 rolled back"));
    }

    #[tokio::test]
    async fn test_webhook_errors() {
        let (url, _rx) = serve(500).await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            notifier.notify(&rolled_back()).await,
            Err(NotifyError::Delivery(_))
        ));

        let notifier = WebhookNotifier::new(closed_address().await, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            notifier.notify(&rolled_back()).await,
            Err(NotifyError::Unavailable(_))
        ));
    }
}
