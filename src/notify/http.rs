//! HTTP notification transport

use crate::core::traits::NotificationSender;
use crate::types::{DeliveryError, NotificationBody};
use async_trait::async_trait;
use std::time::Duration;

/// POSTs notification bodies as JSON with `reqwest`
///
/// The sender only reports what happened on the wire: the response status
/// for any completed request, or a `Transport` error otherwise. Deciding
/// whether a status counts as delivered is left to the dispatcher.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    /// Build a sender whose requests time out after `request_timeout`
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built (for example when no TLS backend is available).
    pub fn new(request_timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| DeliveryError::Configuration {
                message: error.to_string(),
            })?;
        Ok(HttpSender { client })
    }
}

#[async_trait]
impl NotificationSender for HttpSender {
    async fn send(&self, target: &str, body: &NotificationBody) -> Result<u16, DeliveryError> {
        let response = self.client.post(target).json(body).send().await?;
        let status = response.status().as_u16();
        tracing::trace!(url = target, status, "notification POST completed");
        Ok(status)
    }
}
