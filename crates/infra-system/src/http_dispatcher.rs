// HTTP dispatcher: delivers queued operations to the shop backend
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use shopguard_core::domain::QueuedOperation;
use shopguard_core::port::{DispatchError, OperationDispatcher};

/// POSTs the operation payload to `{base_url}/{kind}`.
///
/// The operation id travels as `Idempotency-Key` so a delivery retried after a
/// lost response is not applied twice.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    /// `request_timeout` bounds the HTTP exchange; the isolator's call timeout
    /// still applies on top of it
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::Connection(format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, op: &QueuedOperation) -> String {
        format!("{}/{}", self.base_url, op.kind.as_str())
    }
}

/// Map transport failures onto the breaker's failure classes
pub(crate) fn classify(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout
    } else if let Some(error) = err.status().and_then(|s| DispatchError::from_status(s.as_u16())) {
        error
    } else if err.is_connect() || err.is_request() {
        DispatchError::Connection(err.to_string())
    } else {
        DispatchError::Rejected(err.to_string())
    }
}

#[async_trait]
impl OperationDispatcher for HttpDispatcher {
    async fn dispatch(&self, op: &QueuedOperation) -> Result<(), DispatchError> {
        let url = self.endpoint(op);
        debug!(operation_id = %op.id, url = %url, "Dispatching operation");

        let response = self
            .client
            .post(&url)
            .header("Idempotency-Key", op.id.as_str())
            .json(op.payload.as_value())
            .send()
            .await
            .map_err(classify)?;

        match DispatchError::from_status(response.status().as_u16()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
