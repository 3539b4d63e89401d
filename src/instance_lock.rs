//! Per-pin instance lock using a Unix socket.
//!
//! Two processes watching the same GPIO pin would fight over the sysfs export
//! and both report every transition. The lock is a bound Unix socket named
//! after the pin; the OS releases it when the process dies, so a crashed
//! monitor never leaves a stale lock behind.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another process is already monitoring this pin.
    #[error("another door-sentinel instance is already monitoring GPIO{0}")]
    AlreadyRunning(u32),

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Lock held for as long as this value lives. Dropping it removes the socket file.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `pin` in the runtime directory.
    pub fn acquire(pin: u32) -> Result<Self, InstanceLockError> {
        Self::acquire_in(&runtime_dir(), pin)
    }

    /// Acquire the lock for `pin` with the socket placed in `dir`.
    pub fn acquire_in(dir: &Path, pin: u32) -> Result<Self, InstanceLockError> {
        let path = socket_path(dir, pin);

        // A socket file nobody answers on is left over from a SIGKILL
        if path.exists() {
            match UnixStream::connect(&path) {
                Ok(_) => return Err(InstanceLockError::AlreadyRunning(pin)),
                Err(_) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            // Another instance bound between our check and bind
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(pin))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// `$XDG_RUNTIME_DIR` if set (cleaned on logout), otherwise `/tmp`.
pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

pub fn socket_path(dir: &Path, pin: u32) -> PathBuf {
    dir.join(format!("door-sentinel-gpio{pin}.sock"))
}
