//! Device command collaborator
//!
//! Taps are injected with `adb shell input tap X Y`. Each tap runs on its own
//! short-lived thread so a slow or hung `adb` never stalls the UI loop;
//! failures are logged and counted, never surfaced to the caller.

use crate::error::{MirrorError, Result};
use crate::input::DevicePoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Something that can inject input into the device
pub trait DeviceCommander: Send + Sync {
    /// Tap at `point` in device pixels
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Device`] if the command could not be delivered
    fn tap(&self, point: DevicePoint) -> Result<()>;
}

/// `adb` invocation for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: Option<String>,
}

impl Default for AdbDevice {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            serial: None,
        }
    }
}

impl AdbDevice {
    /// Target `serial`, or the only connected device when `None`
    #[must_use]
    pub fn new(serial: Option<String>) -> Self {
        Self {
            serial: serial.filter(|s| !s.is_empty()),
            ..Self::default()
        }
    }

    /// Use a specific `adb` binary
    #[must_use]
    pub fn with_adb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.adb_path = path.into();
        self
    }

    /// Device serial, if pinned
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Path of the `adb` binary
    #[must_use]
    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    /// Full argument list: `[-s SERIAL] args...`
    #[must_use]
    pub fn args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = Vec::new();
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.into_iter().map(Into::into));
        full
    }

    /// `adb` command with the device selector applied
    #[must_use]
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = Command::new(&self.adb_path);
        command.args(self.args(args));
        command
    }

    /// Arguments for a tap at `point`
    #[must_use]
    pub fn tap_args(&self, point: DevicePoint) -> Vec<String> {
        self.args([
            "shell".to_string(),
            "input".to_string(),
            "tap".to_string(),
            point.x.to_string(),
            point.y.to_string(),
        ])
    }

    /// Run an `adb` command to completion, failing on a non-zero exit
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Device`] if `adb` cannot be spawned or exits
    /// with an error
    pub fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = self.args(args);
        debug!("Running {} {}", self.adb_path.display(), args.join(" "));

        let output = Command::new(&self.adb_path)
            .args(&args)
            .output()
            .map_err(|e| MirrorError::Device(format!("failed to run {}: {e}", self.adb_path.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MirrorError::Device(format!(
                "adb {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DeviceCommander for AdbDevice {
    fn tap(&self, point: DevicePoint) -> Result<()> {
        let args = self.tap_args(point);
        let status = Command::new(&self.adb_path)
            .args(&args)
            .status()
            .map_err(|e| MirrorError::Device(format!("failed to run {}: {e}", self.adb_path.display())))?;

        if status.success() {
            Ok(())
        } else {
            Err(MirrorError::Device(format!("tap at {point} exited with {status}")))
        }
    }
}

#[derive(Debug, Default)]
struct TapCounters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Tap statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapStatistics {
    /// Taps handed to a worker
    pub dispatched: u64,
    /// Taps the device accepted
    pub succeeded: u64,
    /// Taps that failed
    pub failed: u64,
}

/// Fire-and-forget tap delivery
#[derive(Clone)]
pub struct TapDispatcher {
    commander: Arc<dyn DeviceCommander>,
    counters: Arc<TapCounters>,
}

impl std::fmt::Debug for TapDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapDispatcher")
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl TapDispatcher {
    /// Dispatch taps through `commander`
    #[must_use]
    pub fn new(commander: Arc<dyn DeviceCommander>) -> Self {
        Self {
            commander,
            counters: Arc::new(TapCounters::default()),
        }
    }

    /// Send a tap in the background
    ///
    /// Returns the worker handle so callers may wait on it; dropping it
    /// detaches the worker. `None` if the thread could not be spawned.
    pub fn on_click(&self, point: DevicePoint) -> Option<JoinHandle<()>> {
        info!("Tap at {}", point);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let commander = Arc::clone(&self.commander);
        let counters = Arc::clone(&self.counters);
        let spawned = std::thread::Builder::new()
            .name("mirror-tap".to_string())
            .spawn(move || match commander.tap(point) {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!("Tap at {} delivered", point);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Tap at {} failed: {}", point, e);
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Could not spawn tap worker: {}", e);
                None
            }
        }
    }

    /// Statistics snapshot
    #[must_use]
    pub fn statistics(&self) -> TapStatistics {
        TapStatistics {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
