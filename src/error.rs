use crate::instance_lock::InstanceLockError;
use thiserror::Error as ThisError;

/// Failure reading or watching a GPIO line.
#[derive(ThisError, Debug)]
pub enum LineError {
    #[error("GPIO{pin} I/O error: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO{pin} poll failed: {errno}")]
    Poll { pin: u32, errno: nix::errno::Errno },

    #[error("GPIO{pin} returned unparseable value: {raw:?}")]
    Unparseable { pin: u32, raw: String },

    #[error("GPIO{pin} returned invalid level: {level}")]
    InvalidLevel { pin: u32, level: u8 },

    #[error("GPIO{pin} has been released")]
    Released { pin: u32 },

    #[error("GPIO{pin} is already being watched")]
    AlreadyWatching { pin: u32 },

    #[error("GPIO{pin} simulated fault: {reason}")]
    Simulated { pin: u32, reason: String },
}

/// Failure delivering a webhook notification.
#[derive(ThisError, Debug)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint responded with HTTP {0}")]
    Status(u16),

    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// The error from the final attempt, unwrapping `Exhausted`.
    pub fn last(&self) -> &DeliveryError {
        match self {
            DeliveryError::Exhausted { last, .. } => last.last(),
            other => other,
        }
    }
}

/// Invalid configuration detected at startup.
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(ThisError, Debug)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("GPIO line error: {0}")]
    Line(#[from] LineError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Sensor monitor already started")]
    AlreadyStarted,

    #[error("Sensor monitoring stopped unexpectedly")]
    MonitorStopped,

    #[error(transparent)]
    InstanceLock(#[from] InstanceLockError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
