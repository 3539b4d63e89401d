use crate::error::ConfigError;
use crate::input::Edge;
use crate::input::sysfs::DEFAULT_SYSFS_ROOT;
use crate::notify::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::notify::transport::DEFAULT_REQUEST_TIMEOUT;
use crate::sensors::SensorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder signing key. Fine for local testing, insecure anywhere else.
pub const DEFAULT_SIGN_KEY: &str = "default-sign-key";

pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:3000/webhook";

/// Parse `.env` content into key/value pairs.
///
/// Skips blank lines and `#` comments, splits on the first `=`, and strips one
/// layer of matching quotes. Values with spaces need no quoting.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                &value[1..value.len() - 1]
            } else {
                value
            };
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Load environment variables from a `.env` file in the working directory.
/// Variables already set in the environment take precedence.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        if std::env::var(&key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(&key, value) };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub webhook: WebhookConfig,
    pub sensor: SensorConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(skip_serializing, default)]
    pub sign_key: String,
    pub retry_count: u32,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long shutdown waits for in-flight deliveries.
    pub delivery_grace_ms: u64,
    pub gpio_sysfs_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook: WebhookConfig {
                url: DEFAULT_WEBHOOK_URL.to_string(),
                sign_key: DEFAULT_SIGN_KEY.to_string(),
                retry_count: DEFAULT_MAX_RETRIES,
                request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            },
            sensor: SensorConfig::default(),
            runtime: RuntimeConfig {
                delivery_grace_ms: 10_000,
                gpio_sysfs_root: DEFAULT_SYSFS_ROOT.to_string(),
            },
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.retry_count)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn uses_default_key(&self) -> bool {
        self.sign_key == DEFAULT_SIGN_KEY
    }
}

impl RuntimeConfig {
    pub fn delivery_grace(&self) -> Duration {
        Duration::from_millis(self.delivery_grace_ms)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("WEBHOOK_URL") {
            config.webhook.url = url;
        }
        if let Some(key) = lookup("SIGN_KEY") {
            config.webhook.sign_key = key;
        }
        if let Some(retries) = parse_var(&lookup, "RETRY_COUNT")? {
            config.webhook.retry_count = retries;
        }
        if let Some(timeout) = parse_var(&lookup, "REQUEST_TIMEOUT_MS")? {
            config.webhook.request_timeout_ms = timeout;
        }

        // Sensor configuration
        if let Some(pin) = parse_var(&lookup, "DOOR_PIN")? {
            config.sensor.pin = pin;
        }
        if let Some(edge) = parse_var::<Edge, _>(&lookup, "DOOR_EDGE")? {
            config.sensor.edge = edge;
        }
        if let Some(delay) = parse_var(&lookup, "DOOR_OPEN_DELAY_MS")? {
            config.sensor.open_delay = Duration::from_millis(delay);
        }
        if let Some(level) = parse_var(&lookup, "DOOR_OPEN_VALUE")? {
            config.sensor.open_level = level;
        }

        if let Some(grace) = parse_var(&lookup, "DELIVERY_GRACE_MS")? {
            config.runtime.delivery_grace_ms = grace;
        }
        if let Some(root) = lookup("GPIO_SYSFS_ROOT") {
            config.runtime.gpio_sysfs_root = root;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook.url.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "WEBHOOK_URL",
            });
        }
        if !self.webhook.url.starts_with("http://") && !self.webhook.url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                name: "WEBHOOK_URL",
                value: self.webhook.url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.webhook.sign_key.is_empty() {
            return Err(ConfigError::Empty { name: "SIGN_KEY" });
        }
        if self.webhook.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "REQUEST_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sensor.open_level > 1 {
            return Err(ConfigError::Invalid {
                name: "DOOR_OPEN_VALUE",
                value: self.sensor.open_level.to_string(),
                reason: "must be 0 or 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
