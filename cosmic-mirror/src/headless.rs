//! Windowless mirroring
//!
//! Drives the presentation loop on a timer and logs what a window would
//! show. Clicks are read from stdin as `X Y` or `X,Y` view coordinates.

use crate::controller::MirrorController;
use anyhow::Result;
use cosmic_mirror_stream::{run_every, Frame, PresentationStatistics, RenderSurface, ScheduleExit, Size};
use std::io::BufRead;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RATE_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Surface that logs instead of drawing
#[derive(Debug)]
pub struct LogSurface {
    view: Option<Size>,
    frames: u64,
    window_frames: u64,
    window_start: Instant,
    closed: bool,
}

impl Default for LogSurface {
    fn default() -> Self {
        Self {
            view: None,
            frames: 0,
            window_frames: 0,
            window_start: Instant::now(),
            closed: false,
        }
    }
}

impl LogSurface {
    /// Frames presented so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Last requested view size
    pub fn view(&self) -> Option<Size> {
        self.view
    }

    /// Whether the loop closed the surface
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RenderSurface for LogSurface {
    fn resize(&mut self, size: Size) {
        info!("View resized to {}", size);
        self.view = Some(size);
    }

    fn present(&mut self, frame: &Frame, view: Size) {
        if self.frames == 0 {
            info!("First frame: {} shown in {}", frame.size(), view);
        }
        self.frames += 1;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= RATE_REPORT_INTERVAL {
            info!(
                "Presenting {:.1} fps (frame #{})",
                self.window_frames as f64 / elapsed.as_secs_f64(),
                frame.sequence
            );
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }

    fn close(&mut self) {
        info!("View closed after {} frames", self.frames);
        self.closed = true;
    }
}

/// Parse `X Y` or `X,Y`
pub fn parse_click(line: &str) -> Option<(f64, f64)> {
    let mut parts = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty());
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((x, y))
}

/// Forward stdin clicks until EOF
///
/// Runs on a plain thread: a blocked stdin read must not hold up runtime
/// shutdown.
fn spawn_click_reader() -> mpsc::Receiver<(f64, f64)> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("mirror-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_click(&line) {
                    Some(click) => {
                        if tx.send(click).is_err() {
                            break;
                        }
                    }
                    None => warn!("Ignoring input '{}', expected 'X Y'", line.trim()),
                }
            }
            debug!("Click input closed");
        });
    if let Err(e) = spawned {
        warn!("Click input unavailable: {}", e);
    }
    rx
}

/// Present until the stream stops or `cancel` fires
pub async fn run(controller: &MirrorController, cancel: CancellationToken) -> Result<PresentationStatistics> {
    let mut presentation = controller.presentation();
    let mut surface = LogSurface::default();
    let clicks = spawn_click_reader();
    let period = presentation.config().tick_interval();

    info!(
        "Presenting every {:?}; type 'X Y' to tap at a view position",
        period
    );

    let exit = run_every(period, cancel, || {
        while let Ok((x, y)) = clicks.try_recv() {
            match controller.on_click(&presentation, x, y) {
                Some(point) => debug!("Click ({}, {}) sent as tap {}", x, y, point),
                None => info!("Click ({}, {}) is outside the device view", x, y),
            }
        }
        presentation.tick(&mut surface)
    })
    .await;

    match exit {
        ScheduleExit::Teardown if surface.is_closed() => info!("Stream ended"),
        ScheduleExit::Teardown => warn!("Presentation stopped without closing the view"),
        ScheduleExit::Cancelled => info!("Mirroring interrupted"),
    }
    debug!(
        "{} frames presented, last view {:?}",
        surface.frames(),
        surface.view()
    );
    Ok(presentation.statistics())
}
