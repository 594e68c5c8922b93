//! Mirror Configuration
//!
//! Configuration management for the mirror binary. Values come from
//! `<config_dir>/cosmic-mirror/mirror.toml` and may be overridden on the
//! command line.

use anyhow::{bail, Context, Result};
use cosmic_mirror_stream::{
    AdbDevice, CaptureServerConfig, PresentationConfig, ReceiverConfig, Size,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mirror configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Target device
    #[serde(default)]
    pub device: DeviceConfig,

    /// Video stream connection
    #[serde(default)]
    pub stream: StreamConfig,

    /// Mirror window
    #[serde(default)]
    pub window: WindowConfig,

    /// Capture server launch
    #[serde(default)]
    pub server: ServerConfig,
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// `adb` serial (e.g. `192.168.1.2:5555`); the only device when unset
    #[serde(default)]
    pub serial: Option<String>,

    /// `adb` executable
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,
}

/// Stream connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capture server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Capture server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bytes per socket read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long stopping waits for the receive worker, in milliseconds
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,
}

/// Window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    #[serde(default = "default_title")]
    pub title: String,

    /// Window width for a portrait device
    #[serde(default = "default_width")]
    pub width: u32,

    /// Window height for a portrait device
    #[serde(default = "default_height")]
    pub height: u32,

    /// Render ticks per second
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,

    /// Skip ticks with no new frame
    #[serde(default = "default_true")]
    pub render_only_new_frames: bool,

    /// Aspect ratio tolerance for orientation detection
    #[serde(default = "default_orientation_tolerance")]
    pub orientation_tolerance: f64,
}

/// Capture server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Launch the capture server before connecting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Server jar path on the device
    #[serde(default = "default_jar_path")]
    pub jar_path: String,

    /// Server version; must match the jar
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Longest frame edge
    #[serde(default = "default_max_size")]
    pub max_size: u32,

    /// Output line substring signalling readiness
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// Readiness timeout in seconds
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_chunk_size() -> usize {
    4096
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_join_timeout() -> u64 {
    1000
}

fn default_title() -> String {
    "COSMIC Mirror".to_string()
}

fn default_width() -> u32 {
    360
}

fn default_height() -> u32 {
    800
}

fn default_max_fps() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_orientation_tolerance() -> f64 {
    cosmic_mirror_stream::input::DEFAULT_ORIENTATION_TOLERANCE
}

fn default_jar_path() -> String {
    CaptureServerConfig::default().jar_path
}

fn default_server_version() -> String {
    CaptureServerConfig::default().version
}

fn default_max_size() -> u32 {
    1920
}

fn default_ready_marker() -> String {
    cosmic_mirror_stream::server::DEFAULT_READY_MARKER.to_string()
}

fn default_ready_timeout() -> u64 {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: default_adb_path(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout(),
            join_timeout_ms: default_join_timeout(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
            max_fps: default_max_fps(),
            render_only_new_frames: true,
            orientation_tolerance: default_orientation_tolerance(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jar_path: default_jar_path(),
            version: default_server_version(),
            max_size: default_max_size(),
            ready_marker: default_ready_marker(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// Device serial
    pub serial: Option<String>,
    /// Capture server host
    pub host: Option<String>,
    /// Capture server port
    pub port: Option<u16>,
    /// Render rate
    pub max_fps: Option<u32>,
    /// Window size
    pub window_size: Option<(u32, u32)>,
    /// Skip launching the capture server
    pub no_server: bool,
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("cosmic-mirror")
            .join("mirror.toml")
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, creating a default file if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref serial) = overrides.serial {
            self.device.serial = Some(serial.clone());
        }
        if let Some(ref host) = overrides.host {
            self.stream.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.stream.port = port;
        }
        if let Some(max_fps) = overrides.max_fps {
            self.window.max_fps = max_fps;
        }
        if let Some((width, height)) = overrides.window_size {
            self.window.width = width;
            self.window.height = height;
        }
        if overrides.no_server {
            self.server.enabled = false;
        }
        self
    }

    /// Check values before anything is started
    pub fn validate(&self) -> Result<()> {
        if self.stream.host.trim().is_empty() {
            bail!("stream.host must not be empty");
        }
        if self.stream.chunk_size == 0 {
            bail!("stream.chunk_size must be greater than 0");
        }
        if self.window.width == 0 || self.window.height == 0 {
            bail!(
                "window size {}x{} has a zero dimension",
                self.window.width,
                self.window.height
            );
        }
        if self.window.max_fps == 0 {
            bail!("window.max_fps must be greater than 0");
        }
        if self.server.enabled && self.server.ready_timeout_secs == 0 {
            bail!("server.ready_timeout_secs must be greater than 0");
        }
        self.receiver_config()
            .validate()
            .context("Invalid [stream] settings")?;
        self.presentation_config()
            .validate()
            .context("Invalid [window] settings")?;
        Ok(())
    }

    /// Configured window size
    pub fn window_size(&self) -> Size {
        Size::new(self.window.width, self.window.height)
    }

    /// `adb` handle for the configured device
    pub fn adb_device(&self) -> AdbDevice {
        AdbDevice::new(self.device.serial.clone()).with_adb_path(self.device.adb_path.clone())
    }

    /// Receiver settings
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig::new()
            .with_host(self.stream.host.clone())
            .with_port(self.stream.port)
            .with_chunk_size(self.stream.chunk_size)
            .with_connect_timeout(Duration::from_secs(self.stream.connect_timeout_secs))
            .with_join_timeout(Duration::from_millis(self.stream.join_timeout_ms))
    }

    /// Presentation settings
    pub fn presentation_config(&self) -> PresentationConfig {
        PresentationConfig::default()
            .with_display_size(self.window_size())
            .with_max_fps(self.window.max_fps)
            .with_render_only_new_frames(self.window.render_only_new_frames)
            .with_orientation_tolerance(self.window.orientation_tolerance)
    }

    /// Capture server settings; the forwarded port follows the stream port
    pub fn server_config(&self) -> CaptureServerConfig {
        CaptureServerConfig::default()
            .with_jar_path(self.server.jar_path.clone())
            .with_version(self.server.version.clone())
            .with_port(self.stream.port)
            .with_max_size(self.server.max_size)
            .with_ready_marker(self.server.ready_marker.clone())
            .with_ready_timeout(Duration::from_secs(self.server.ready_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stream.host, "127.0.0.1");
        assert_eq!(config.stream.port, 1234);
        assert_eq!(config.window_size(), Size::new(360, 800));
        assert!(config.server.enabled);
        assert!(config.device.serial.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [device]
            serial = "192.168.1.2:5555"

            [window]
            max_fps = 30
            "#,
        )
        .unwrap();
        assert_eq!(parsed.device.serial.as_deref(), Some("192.168.1.2:5555"));
        assert_eq!(parsed.window.max_fps, 30);
        assert_eq!(parsed.window.width, 360);
        assert_eq!(parsed.stream.port, 1234);
        assert_eq!(parsed.server.ready_marker, "[server] INFO: Device:");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mirror.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());

        let mut changed = config.clone();
        changed.stream.port = 27183;
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().stream.port, 27183);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.toml");
        fs::write(&path, "[stream]\nport = \"not a number\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let overrides = CliOverrides {
            serial: Some("emulator-5554".to_string()),
            port: Some(27183),
            max_fps: Some(24),
            window_size: Some((400, 900)),
            no_server: true,
            ..CliOverrides::default()
        };
        let config = Config::default().with_overrides(&overrides);

        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.stream.host, "127.0.0.1");
        assert_eq!(config.stream.port, 27183);
        assert_eq!(config.window.max_fps, 24);
        assert_eq!(config.window_size(), Size::new(400, 900));
        assert!(!config.server.enabled);
        assert_eq!(config.server_config().port, 27183);
        assert_eq!(config.adb_device().serial(), Some("emulator-5554"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.window.max_fps = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stream.host = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stream.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_orientation_tolerance_validation() {
        let mut config = Config::default();
        config.window.orientation_tolerance = -1.0;
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("orientation tolerance"));

        config.window.orientation_tolerance = f64::NAN;
        assert!(config.validate().is_err());

        config.window.orientation_tolerance = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_library_configs() {
        let config = Config::default();
        let receiver = config.receiver_config();
        assert_eq!(receiver.address(), "127.0.0.1:1234");
        assert_eq!(receiver.join_timeout, Duration::from_secs(1));

        let presentation = config.presentation_config();
        assert_eq!(presentation.display_size, Size::new(360, 800));
        assert_eq!(presentation.max_fps, 60);

        let server = config.server_config();
        assert_eq!(server.ready_timeout, Duration::from_secs(10));
        assert_eq!(server.max_size, 1920);
    }
}
