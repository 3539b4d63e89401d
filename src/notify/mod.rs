//! Webhook notification of door state changes.
//!
//! Key pieces:
//! - [`PayloadSigner`]: HMAC-SHA256 over the canonical `{payload..., timestamp}` JSON
//! - [`RetryPolicy`]: attempt budget and doubling backoff
//! - [`WebhookTransport`]: one HTTP attempt (reqwest in production)
//! - [`NotificationDispatcher`]: signs, sends and retries

pub mod dispatcher;
pub mod retry;
pub mod signer;
pub mod transport;

pub use dispatcher::{DeliveryAttempt, NotificationDispatcher, timestamp_now};
pub use retry::RetryPolicy;
pub use signer::{NotificationPayload, PayloadSigner, canonical_json, signature_header};
pub use transport::{HttpTransport, WebhookRequest, WebhookTransport};
