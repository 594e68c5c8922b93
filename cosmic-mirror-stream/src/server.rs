//! Capture server lifecycle
//!
//! The capture server is a scrcpy server jar already pushed to the device.
//! Starting it takes two `adb` calls:
//!
//! ```text
//! adb [-s SERIAL] forward tcp:PORT localabstract:scrcpy
//! adb [-s SERIAL] shell CLASSPATH=<jar> app_process / com.genymobile.scrcpy.Server <version> \
//!     tunnel_forward=true audio=false control=false cleanup=false raw_stream=true max_size=<n>
//! ```
//!
//! The second call keeps running for the lifetime of the stream. The server
//! is considered ready once its output contains the device identification
//! line; every output line is logged.

use crate::device::AdbDevice;
use crate::error::{MirrorError, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output line announcing that the server is streaming
pub const DEFAULT_READY_MARKER: &str = "[server] INFO: Device:";

/// Capture server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureServerConfig {
    /// Location of the server jar on the device
    pub jar_path: String,
    /// Server protocol version; must match the jar
    pub version: String,
    /// Local TCP port forwarded to the server socket
    pub port: u16,
    /// Longest frame edge requested from the encoder
    pub max_size: u32,
    /// Output substring that signals readiness
    pub ready_marker: String,
    /// How long to wait for the marker
    pub ready_timeout: Duration,
}

impl Default for CaptureServerConfig {
    fn default() -> Self {
        Self {
            jar_path: "/data/local/tmp/scrcpy-server-manual.jar".to_string(),
            version: "3.3.1".to_string(),
            port: 1234,
            max_size: 1920,
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

impl CaptureServerConfig {
    /// Set the jar path on the device
    #[must_use]
    pub fn with_jar_path(mut self, path: impl Into<String>) -> Self {
        self.jar_path = path.into();
        self
    }

    /// Set the server version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the forwarded port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the maximum frame size
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the readiness marker
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    /// Set the readiness timeout
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Arguments for the port forward
    #[must_use]
    pub fn forward_args(&self) -> Vec<String> {
        vec![
            "forward".to_string(),
            format!("tcp:{}", self.port),
            "localabstract:scrcpy".to_string(),
        ]
    }

    /// Arguments removing the port forward
    #[must_use]
    pub fn remove_forward_args(&self) -> Vec<String> {
        vec![
            "forward".to_string(),
            "--remove".to_string(),
            format!("tcp:{}", self.port),
        ]
    }

    /// Arguments launching the server
    #[must_use]
    pub fn launch_args(&self) -> Vec<String> {
        vec![
            "shell".to_string(),
            format!("CLASSPATH={}", self.jar_path),
            "app_process".to_string(),
            "/".to_string(),
            "com.genymobile.scrcpy.Server".to_string(),
            self.version.clone(),
            "tunnel_forward=true".to_string(),
            "audio=false".to_string(),
            "control=false".to_string(),
            "cleanup=false".to_string(),
            "raw_stream=true".to_string(),
            format!("max_size={}", self.max_size),
        ]
    }
}

/// Log every line of `reader` on a background thread
///
/// The returned receiver yields once, when a line containing `marker`
/// appears. It disconnects if the output ends first. The thread keeps
/// draining the output until EOF so the writer never blocks on a full pipe.
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn watch_output<R>(reader: R, marker: impl Into<String>) -> Result<Receiver<()>>
where
    R: Read + Send + 'static,
{
    let marker = marker.into();
    let (ready_tx, ready_rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("capture-server-out".to_string())
        .spawn(move || {
            let mut ready_tx = Some(ready_tx);
            for line in BufReader::new(reader).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("Capture server output ended: {}", e);
                        break;
                    }
                };
                info!("[capture server] {}", line.trim_end());

                if line.contains(&marker) {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
            debug!("Capture server output closed");
        })?;

    Ok(ready_rx)
}

/// Wait until `ready` fires, the output ends, or `timeout` elapses
///
/// # Errors
///
/// Returns [`MirrorError::ServerTimeout`] or [`MirrorError::ServerExited`]
pub fn await_ready(ready: &Receiver<()>, timeout: Duration) -> Result<()> {
    match ready.recv_timeout(timeout) {
        Ok(()) => Ok(()),
        Err(RecvTimeoutError::Timeout) => Err(MirrorError::ServerTimeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(MirrorError::ServerExited),
    }
}

fn log_stderr<R: Read + Send + 'static>(reader: R) {
    let spawned = std::thread::Builder::new()
        .name("capture-server-err".to_string())
        .spawn(move || {
            for line in BufReader::new(reader).lines().map_while(std::result::Result::ok) {
                warn!("[capture server] {}", line.trim_end());
            }
        });
    if let Err(e) = spawned {
        warn!("Could not watch capture server stderr: {}", e);
    }
}

/// Running capture server process
pub struct CaptureServer {
    device: AdbDevice,
    config: CaptureServerConfig,
    child: Option<Child>,
}

impl CaptureServer {
    /// Create a server handle; nothing runs until [`start`](Self::start)
    #[must_use]
    pub fn new(device: AdbDevice, config: CaptureServerConfig) -> Self {
        Self {
            device,
            config,
            child: None,
        }
    }

    /// Forward the port, launch the server and wait for readiness
    ///
    /// # Errors
    ///
    /// Returns error if already started, if `adb` fails, or if the marker
    /// does not appear within the timeout. A server that never became
    /// ready is killed.
    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(MirrorError::Server("capture server already started".to_string()));
        }

        info!("Setting up capture server port forward on tcp:{}", self.config.port);
        self.device
            .run(self.config.forward_args())
            .map_err(|e| MirrorError::Server(e.to_string()))?;

        info!("Starting capture server {}...", self.config.version);
        let mut child = self
            .device
            .command(self.config.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MirrorError::Server(format!("failed to launch capture server: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            log_stderr(stderr);
        }

        let ready = match child.stdout.take() {
            Some(stdout) => watch_output(stdout, self.config.ready_marker.clone()),
            None => Err(MirrorError::Server("capture server stdout unavailable".to_string())),
        };

        match ready.and_then(|ready| await_ready(&ready, self.config.ready_timeout)) {
            Ok(()) => {
                info!("Capture server ready");
                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                warn!("Capture server failed to become ready: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Terminate the server and remove the port forward
    ///
    /// Idempotent. Returns `true` if a process was stopped.
    pub fn stop(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };

        info!("Stopping capture server");
        if let Err(e) = child.kill() {
            // Already exited
            debug!("Capture server kill: {}", e);
        }
        match child.wait() {
            Ok(status) => debug!("Capture server exited: {}", status),
            Err(e) => warn!("Failed to reap capture server: {}", e),
        }

        if let Err(e) = self.device.run(self.config.remove_forward_args()) {
            debug!("Port forward removal failed: {}", e);
        }
        true
    }

    /// Whether the server process is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("Capture server exited on its own: {}", status);
                false
            }
            Some(Err(e)) => {
                warn!("Cannot query capture server: {}", e);
                false
            }
            None => false,
        }
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &CaptureServerConfig {
        &self.config
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.stop();
    }
}
