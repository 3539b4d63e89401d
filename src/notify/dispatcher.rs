//! Signed webhook delivery with exponential-backoff retry.
//!
//! Each [`notify`](NotificationDispatcher::notify) call owns its own attempt
//! and backoff state, so concurrent calls are independent. Callers should
//! spawn `notify` rather than await it on the sensor path.

use super::retry::RetryPolicy;
use super::signer::{NotificationPayload, PayloadSigner, signature_header};
use super::transport::{HttpTransport, WebhookRequest, WebhookTransport, headers};
use crate::config::WebhookConfig;
use crate::error::{DeliveryError, SentinelError};
use crate::sensors::DoorState;
use chrono::{SecondsFormat, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// One prepared delivery: the signed request plus a log correlation ID.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub timestamp: String,
    pub request: WebhookRequest,
}

/// Current time as sent in `X-Timestamp`: RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Delivers door state changes to the configured webhook.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct NotificationDispatcher {
    url: Arc<str>,
    signer: PayloadSigner,
    retry: RetryPolicy,
    transport: Arc<dyn WebhookTransport>,
}

impl NotificationDispatcher {
    /// Create a dispatcher backed by reqwest.
    pub fn new(config: &WebhookConfig) -> Result<Self, SentinelError> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(
            &config.url,
            PayloadSigner::new(&config.sign_key),
            config.retry_policy(),
            Arc::new(transport),
        ))
    }

    pub fn with_transport(
        url: &str,
        signer: PayloadSigner,
        retry: RetryPolicy,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            url: Arc::from(url),
            signer,
            retry,
            transport,
        }
    }

    /// Deliver `state`, retrying failed attempts with backoff.
    ///
    /// On exhaustion returns [`DeliveryError::Exhausted`] carrying the final
    /// attempt's error. Never panics on delivery failure.
    pub async fn notify(&self, state: DoorState) -> Result<(), DeliveryError> {
        let attempt = self.prepare(&NotificationPayload::from(state), timestamp_now());
        info!(
            "[Webhook] Sending notification {} to {} with state: {}",
            attempt.id,
            self.url,
            String::from_utf8_lossy(&attempt.request.body)
        );
        self.deliver(&attempt).await
    }

    /// Build the signed request for `payload` at `timestamp`.
    ///
    /// The body carries only the payload; the timestamp travels in
    /// `X-Timestamp` but is part of the signed material.
    pub fn prepare(&self, payload: &NotificationPayload, timestamp: String) -> DeliveryAttempt {
        let signature = self.signer.sign(payload, &timestamp);
        let body = serde_json::to_vec(payload).expect("payload serializes to JSON");

        DeliveryAttempt {
            id: Uuid::new_v4(),
            request: WebhookRequest {
                url: self.url.to_string(),
                headers: vec![
                    (headers::CONTENT_TYPE, "application/json".to_string()),
                    (headers::SIGNATURE, signature_header(&signature)),
                    (headers::TIMESTAMP, timestamp.clone()),
                ],
                body,
            },
            timestamp,
        }
    }

    async fn deliver(&self, attempt: &DeliveryAttempt) -> Result<(), DeliveryError> {
        let total = self.retry.total_attempts();
        let mut number = 0;

        loop {
            number += 1;
            debug!(
                "[Webhook] Delivery {} attempt {}/{}",
                attempt.id, number, total
            );

            let outcome = match self.transport.send(&attempt.request).await {
                Ok(status) if (200..300).contains(&status) => Ok(status),
                Ok(status) => Err(DeliveryError::Status(status)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(status) => {
                    info!(
                        "[Webhook] Delivery {} succeeded with HTTP {} (attempt {})",
                        attempt.id, status, number
                    );
                    return Ok(());
                }
                Err(e) if self.retry.should_retry(number) => {
                    let delay = self.retry.delay_after(number);
                    warn!(
                        "[Webhook] Delivery {} attempt {}/{} failed: {}; retrying in {}ms",
                        attempt.id,
                        number,
                        total,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "[Webhook] Failed to notify webhook after {} attempts: {}",
                        number, e
                    );
                    return Err(DeliveryError::Exhausted {
                        attempts: number,
                        last: Box::new(e),
                    });
                }
            }
        }
    }
}
