//! Command Line and Logging
//!
//! Provides the command-line interface, logging setup and statistics
//! output for the mirror binary.

use crate::config::CliOverrides;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use cosmic_mirror_stream::{PresentationStatistics, ReceiverStatistics, TapStatistics};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// COSMIC Mirror command-line interface
#[derive(Parser, Debug)]
#[command(name = "cosmic-mirror")]
#[command(about = "Mirror and control an Android device screen over adb", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub timestamps: bool,

    /// Config file (default: <config dir>/cosmic-mirror/mirror.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// adb device serial
    #[arg(short, long, value_name = "SERIAL")]
    pub serial: Option<String>,

    /// Capture server host
    #[arg(long)]
    pub host: Option<String>,

    /// Capture server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Render rate
    #[arg(long, value_name = "FPS")]
    pub max_fps: Option<u32>,

    /// Window size for a portrait device
    #[arg(long, value_name = "WxH", value_parser = parse_window_size)]
    pub window_size: Option<(u32, u32)>,

    /// Connect to an already running capture server
    #[arg(long)]
    pub no_server: bool,

    /// Subcommand (default: run)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mirror the device screen
    Run {
        /// Run without a window even when built with the GUI
        #[arg(long)]
        headless: bool,
    },

    /// Capture the raw stream and summarize its NAL units
    Analyze {
        /// Write the raw H.264 stream to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Stop after this many frames (0 = until the stream ends)
        #[arg(short = 'n', long, default_value = "0")]
        max_frames: u64,

        /// Write a per-frame report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Log every frame as it arrives
        #[arg(long)]
        details: bool,
    },

    /// Show current configuration
    DumpConfig,
}

impl Cli {
    /// Values that override the config file
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            serial: self.serial.clone(),
            host: self.host.clone(),
            port: self.port,
            max_fps: self.max_fps,
            window_size: self.window_size,
            no_server: self.no_server,
        }
    }
}

/// Parse `WIDTHxHEIGHT`
fn parse_window_size(value: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|e| format!("invalid width '{width}': {e}"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|e| format!("invalid height '{height}': {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("window size {value} has a zero dimension"));
    }
    Ok((width, height))
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit_index])
    }
}

/// Session summary printed on shutdown
pub fn display_session(
    receiver: &ReceiverStatistics,
    presentation: Option<&PresentationStatistics>,
    taps: &TapStatistics,
) {
    println!("\n=== COSMIC Mirror Session ===");
    println!("\nStream:");
    println!(
        "  Received: {} in {} reads",
        format_bytes(receiver.bytes_received),
        receiver.chunks_received
    );
    println!(
        "  NAL units: {} ({} parameter sets, {} keyframes, {} predicted, {} other)",
        receiver.total_units(),
        receiver.parameter_sets,
        receiver.keyframes,
        receiver.non_keyframes,
        receiver.other_units
    );
    println!(
        "  Frames decoded: {} ({} decode errors)",
        receiver.frames_decoded, receiver.decode_errors
    );
    if receiver.bytes_discarded > 0 {
        println!("  Discarded: {}", format_bytes(receiver.bytes_discarded));
    }
    if let Some(presentation) = presentation {
        println!("\nPresentation:");
        println!(
            "  Frames shown: {} over {} ticks",
            presentation.frames_presented, presentation.ticks
        );
        println!("  Orientation changes: {}", presentation.orientation_changes);
    }
    println!("\nInput:");
    println!(
        "  Taps: {} sent, {} failed",
        taps.succeeded, taps.failed
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_parse_window_size() {
        assert_eq!(parse_window_size("360x800"), Ok((360, 800)));
        assert_eq!(parse_window_size("1080X2400"), Ok((1080, 2400)));
        assert!(parse_window_size("360").is_err());
        assert!(parse_window_size("0x800").is_err());
        assert!(parse_window_size("axb").is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "cosmic-mirror",
            "--serial",
            "192.168.1.2:5555",
            "--port",
            "27183",
            "--window-size",
            "400x900",
            "--no-server",
            "run",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Command::Run { headless: false }));
        let overrides = cli.overrides();
        assert_eq!(overrides.serial.as_deref(), Some("192.168.1.2:5555"));
        assert_eq!(overrides.port, Some(27183));
        assert_eq!(overrides.window_size, Some((400, 900)));
        assert!(overrides.no_server);
        assert!(overrides.host.is_none());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["cosmic-mirror"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(cli.timestamps);
        assert!(!cli.json_logs);
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["cosmic-mirror", "--timestamps", "false"]).unwrap();
        assert!(!cli.timestamps);
    }

    #[test]
    fn test_analyze_arguments() {
        let cli = Cli::try_parse_from([
            "cosmic-mirror",
            "analyze",
            "-o",
            "output.h264",
            "-n",
            "100",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Analyze {
                output, max_frames, ..
            }) => {
                assert_eq!(output, Some(PathBuf::from("output.h264")));
                assert_eq!(max_frames, 100);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
