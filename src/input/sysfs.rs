//! Linux sysfs GPIO line.
//!
//! Exports the pin under `/sys/class/gpio`, configures it as an input with the
//! requested edge, and waits for interrupts by polling the `value` file for
//! `POLLPRI`. The kernel signals every matching edge that way; the level is
//! re-read from offset 0 after each wakeup.

use crate::error::LineError;
use crate::input::{Edge, GpioLine, LineEvents, validate_level};
use crate::sensors::RawLevel;
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default sysfs GPIO root.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// How long a single `poll` waits before re-checking for release.
const WATCH_POLL_MS: u16 = 250;

/// Pause after a failed `poll` before waiting again.
const POLL_ERROR_PAUSE: Duration = Duration::from_millis(500);

/// The pin directory can take a moment to appear after export (udev).
const EXPORT_WAIT_STEPS: u32 = 20;
const EXPORT_WAIT_STEP: Duration = Duration::from_millis(10);

/// GPIO input exposed through the sysfs interface.
pub struct SysfsLine {
    pin: u32,
    root: PathBuf,
    exported_here: bool,
    stop: Arc<AtomicBool>,
    watcher: Mutex<Option<thread::JoinHandle<()>>>,
    released: AtomicBool,
}

impl SysfsLine {
    /// Open `pin` under the default sysfs root.
    pub fn open(pin: u32) -> Result<Self, LineError> {
        Self::open_at(DEFAULT_SYSFS_ROOT, pin)
    }

    /// Open `pin` under a custom sysfs root.
    pub fn open_at(root: impl Into<PathBuf>, pin: u32) -> Result<Self, LineError> {
        let root = root.into();
        let pin_dir = root.join(format!("gpio{pin}"));

        let exported_here = if pin_dir.exists() {
            debug!("[Sensor] GPIO{} already exported", pin);
            false
        } else {
            write_attr(pin, &root.join("export"), &pin.to_string())?;
            wait_for_dir(&pin_dir);
            true
        };

        write_attr(pin, &pin_dir.join("direction"), "in")?;

        info!(
            "[Sensor] Opened GPIO{} at {} (exported here: {})",
            pin,
            pin_dir.display(),
            exported_here
        );

        Ok(Self {
            pin,
            root,
            exported_here,
            stop: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    fn attr_path(&self, attr: &str) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join(attr)
    }

    fn ensure_live(&self) -> Result<(), LineError> {
        if self.released.load(Ordering::SeqCst) {
            Err(LineError::Released { pin: self.pin })
        } else {
            Ok(())
        }
    }

    fn stop_watcher(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("[Sensor] GPIO{} watcher thread panicked", self.pin);
        }
    }
}

impl GpioLine for SysfsLine {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn watch(&self, edge: Edge) -> Result<LineEvents, LineError> {
        self.ensure_live()?;
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return Err(LineError::AlreadyWatching { pin: self.pin });
        }

        write_attr(self.pin, &self.attr_path("edge"), &edge.to_string())?;

        let pin = self.pin;
        let mut value = File::open(self.attr_path("value")).map_err(|source| LineError::Io {
            pin,
            source,
        })?;
        // Consume the current value so the first poll waits for a real edge
        read_value(pin, &mut value)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("gpio{pin}-watch"))
            .spawn(move || watch_loop(pin, value, stop, tx, wait_for_edge))
            .map_err(|source| LineError::Io { pin, source })?;
        *watcher = Some(handle);

        info!("[Sensor] Watching GPIO{} for {} edges", pin, edge);
        Ok(rx)
    }

    fn read_level(&self) -> Result<RawLevel, LineError> {
        self.ensure_live()?;
        let raw = fs::read_to_string(self.attr_path("value")).map_err(|source| LineError::Io {
            pin: self.pin,
            source,
        })?;
        parse_level(self.pin, &raw)
    }

    fn release(&self) -> Result<(), LineError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_watcher();

        if self.exported_here {
            write_attr(self.pin, &self.root.join("unexport"), &self.pin.to_string())?;
            info!("[Sensor] Unexported GPIO{}", self.pin);
        }
        Ok(())
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("[Sensor] Failed to release GPIO{} on drop: {}", self.pin, e);
        }
    }
}

/// Block until the kernel flags an edge on `value`, or the poll times out.
fn wait_for_edge(value: &File) -> Result<bool, Errno> {
    let mut fds = [PollFd::new(
        value.as_fd(),
        PollFlags::POLLPRI | PollFlags::POLLERR,
    )];
    let ready = poll(&mut fds, PollTimeout::from(WATCH_POLL_MS))?;
    Ok(ready > 0
        && fds[0]
            .revents()
            .is_some_and(|r| r.intersects(PollFlags::POLLPRI | PollFlags::POLLERR)))
}

/// Forward a reading for every edge until `stop` is set or the receiver goes away.
///
/// Poll failures are reported on the stream and the loop keeps watching.
fn watch_loop<W>(
    pin: u32,
    mut value: File,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Result<RawLevel, LineError>>,
    mut wait: W,
) where
    W: FnMut(&File) -> Result<bool, Errno>,
{
    while !stop.load(Ordering::SeqCst) {
        let reading = match wait(&value) {
            Ok(false) | Err(Errno::EINTR) => continue,
            Ok(true) => read_value(pin, &mut value),
            Err(errno) => {
                warn!("[Sensor] GPIO{} poll failed, retrying: {}", pin, errno);
                if tx.send(Err(LineError::Poll { pin, errno })).is_err() {
                    debug!("[Sensor] GPIO{} event receiver dropped", pin);
                    break;
                }
                thread::sleep(POLL_ERROR_PAUSE);
                continue;
            }
        };

        if tx.send(reading).is_err() {
            debug!("[Sensor] GPIO{} event receiver dropped", pin);
            break;
        }
    }
    debug!("[Sensor] GPIO{} watcher stopped", pin);
}

fn read_value(pin: u32, file: &mut File) -> Result<RawLevel, LineError> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut raw))
        .map_err(|source| LineError::Io { pin, source })?;
    parse_level(pin, &raw)
}

fn parse_level(pin: u32, raw: &str) -> Result<RawLevel, LineError> {
    let level = raw
        .trim()
        .parse::<RawLevel>()
        .map_err(|_| LineError::Unparseable {
            pin,
            raw: raw.trim().to_string(),
        })?;
    validate_level(pin, level)
}

fn write_attr(pin: u32, path: &Path, value: &str) -> Result<(), LineError> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .and_then(|mut f| f.write_all(value.as_bytes()))
        .map_err(|source| LineError::Io { pin, source })
}

fn wait_for_dir(dir: &Path) {
    for _ in 0..EXPORT_WAIT_STEPS {
        if dir.exists() {
            return;
        }
        thread::sleep(EXPORT_WAIT_STEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs tree with `gpio<pin>` already exported.
    fn fake_sysfs(pin: u32, value: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let pin_dir = dir.path().join(format!("gpio{pin}"));
        fs::create_dir(&pin_dir).unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("edge"), "none").unwrap();
        fs::write(pin_dir.join("value"), value).unwrap();
        dir
    }

    #[test]
    fn test_open_sets_direction_and_reads_level() {
        let root = fake_sysfs(17, "1\n");
        let line = SysfsLine::open_at(root.path(), 17).unwrap();

        let direction = fs::read_to_string(root.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "in");
        assert_eq!(line.pin(), 17);
        assert_eq!(line.read_level().unwrap(), 1);
    }

    #[test]
    fn test_open_exports_missing_pin() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("export"), "").unwrap();

        // The fake tree never grows gpio5/, so setting direction fails
        let result = SysfsLine::open_at(root.path(), 5);
        assert!(matches!(result, Err(LineError::Io { pin: 5, .. })));

        let exported = fs::read_to_string(root.path().join("export")).unwrap();
        assert_eq!(exported, "5");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let root = fake_sysfs(4, "2\n");
        let line = SysfsLine::open_at(root.path(), 4).unwrap();
        assert!(matches!(
            line.read_level(),
            Err(LineError::InvalidLevel { pin: 4, level: 2 })
        ));

        fs::write(root.path().join("gpio4/value"), "high").unwrap();
        assert!(matches!(
            line.read_level(),
            Err(LineError::Unparseable { pin: 4, .. })
        ));
    }

    #[test]
    fn test_watcher_survives_poll_errors() {
        let root = fake_sysfs(4, "1\n");
        let value = File::open(root.path().join("gpio4/value")).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Fail once, report one edge, then stop
        let mut calls = 0;
        let stop_after = stop.clone();
        watch_loop(4, value, stop.clone(), tx, move |_: &File| {
            calls += 1;
            match calls {
                1 => Err(Errno::EBADF),
                2 => Err(Errno::EINTR),
                3 => Ok(true),
                _ => {
                    stop_after.store(true, Ordering::SeqCst);
                    Ok(false)
                }
            }
        });

        assert!(matches!(
            rx.try_recv(),
            Ok(Err(LineError::Poll {
                pin: 4,
                errno: Errno::EBADF
            }))
        ));
        assert!(matches!(rx.try_recv(), Ok(Ok(1))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watcher_stops_when_receiver_is_gone() {
        let root = fake_sysfs(4, "0\n");
        let value = File::open(root.path().join("gpio4/value")).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        // Returns instead of looping forever
        watch_loop(4, value, Arc::new(AtomicBool::new(false)), tx, |_: &File| {
            Err(Errno::ENOMEM)
        });
    }

    #[test]
    fn test_watch_writes_edge_and_release_is_idempotent() {
        let root = fake_sysfs(4, "0\n");
        let line = SysfsLine::open_at(root.path(), 4).unwrap();

        let _events = line.watch(Edge::Falling).unwrap();
        let edge = fs::read_to_string(root.path().join("gpio4/edge")).unwrap();
        assert_eq!(edge, "falling");
        assert!(matches!(
            line.watch(Edge::Both),
            Err(LineError::AlreadyWatching { pin: 4 })
        ));

        line.release().unwrap();
        line.release().unwrap();
        assert!(matches!(line.read_level(), Err(LineError::Released { pin: 4 })));

        // Pre-exported pins are left exported
        let unexported = fs::read_to_string(root.path().join("unexport")).unwrap();
        assert!(unexported.is_empty());
    }
}
