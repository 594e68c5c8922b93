//! COSMIC Mirror
//!
//! Mirrors an Android device screen streamed by a scrcpy capture server and
//! forwards clicks back to the device as taps.

mod analyze;
mod config;
mod controller;
mod diagnostics;
#[cfg(feature = "gui")]
mod gui;
mod headless;

use analyze::AnalyzeOptions;
use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use controller::MirrorController;
use diagnostics::{Cli, Command};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting COSMIC Mirror {}", cosmic_mirror_stream::VERSION);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?
    .with_overrides(&cli.overrides());
    config.validate().context("Invalid configuration")?;

    match cli.command.clone().unwrap_or(Command::Run { headless: false }) {
        Command::Run { headless } => run_mirror(config, headless),
        Command::Analyze {
            output,
            max_frames,
            report,
            details,
        } => run_analyze(
            config,
            AnalyzeOptions {
                output,
                max_frames,
                report,
                details,
            },
        ),
        Command::DumpConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn run_mirror(config: Config, headless: bool) -> Result<()> {
    if cfg!(not(feature = "h264")) {
        bail!("No video decoder available; rebuild with the h264 feature");
    }

    info!(
        "Device: {}",
        config.device.serial.as_deref().unwrap_or("(only connected device)")
    );
    info!("Stream: {}:{}", config.stream.host, config.stream.port);

    let mut controller = MirrorController::new(config);
    controller.start(controller::default_decoder)?;

    #[cfg(feature = "gui")]
    if !headless {
        return gui::run(controller);
    }
    #[cfg(not(feature = "gui"))]
    if !headless {
        info!("Built without the gui feature, running headless");
    }

    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    let presentation = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                on_signal.cancel();
            }
        });
        info!("Press Ctrl+C to stop");
        headless::run(&controller, cancel).await
    })?;

    controller.stop();
    let (receiver, taps) = controller.statistics();
    diagnostics::display_session(&receiver, Some(&presentation), &taps);
    Ok(())
}

fn run_analyze(config: Config, options: AnalyzeOptions) -> Result<()> {
    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                on_signal.cancel();
            }
        });

        tokio::task::spawn_blocking(move || analyze::run(&config, &options, &cancel))
            .await
            .context("Analyzer task failed")?
    })
}
