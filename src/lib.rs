//! Door Sentinel library.
//!
//! Watches a reed switch on a GPIO line, debounces door openings, and
//! reports every confirmed open/closed transition to an HTTP webhook signed
//! with HMAC-SHA256.

pub mod config;
pub mod error;
pub mod input;
pub mod instance_lock;
pub mod notify;
pub mod relay;
pub mod sensors;

pub use config::Config;
pub use error::{Result, SentinelError};
pub use relay::DeliveryRelay;
