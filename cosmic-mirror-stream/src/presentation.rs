//! Presentation loop
//!
//! A fixed-interval tick, driven by whatever timer the host UI provides,
//! that samples the hand-off slot and shows the newest frame. Each tick:
//!
//! 1. Pull the latest frame (never waits)
//! 2. Re-derive orientation from the frame size; resize the surface on a flip
//! 3. Present the frame scaled to the current view size
//! 4. Request teardown once the stream has stopped
//!
//! The loop owns the [`ViewGeometry`], so clicks are mapped with the same
//! orientation and device size as the frame on screen.

use crate::error::{MirrorError, Result};
use crate::frame::{Frame, Size};
use crate::input::{DevicePoint, Orientation, ViewGeometry, DEFAULT_ORIENTATION_TOLERANCE};
use crate::state::{Lifecycle, StreamState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Presentation configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresentationConfig {
    /// Window size for a portrait device
    pub display_size: Size,
    /// Tick rate
    pub max_fps: u32,
    /// Only present frames pushed since the previous tick
    pub render_only_new_frames: bool,
    /// Aspect ratio tolerance for orientation detection
    pub orientation_tolerance: f64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            display_size: Size::new(360, 800),
            max_fps: 60,
            render_only_new_frames: true,
            orientation_tolerance: DEFAULT_ORIENTATION_TOLERANCE,
        }
    }
}

impl PresentationConfig {
    /// Set the configured window size
    #[must_use]
    pub fn with_display_size(mut self, size: Size) -> Self {
        self.display_size = size;
        self
    }

    /// Set the tick rate
    #[must_use]
    pub fn with_max_fps(mut self, max_fps: u32) -> Self {
        self.max_fps = max_fps;
        self
    }

    /// Present every tick (`false`) or only new frames (`true`)
    #[must_use]
    pub fn with_render_only_new_frames(mut self, enabled: bool) -> Self {
        self.render_only_new_frames = enabled;
        self
    }

    /// Set the orientation tolerance
    #[must_use]
    pub fn with_orientation_tolerance(mut self, tolerance: f64) -> Self {
        self.orientation_tolerance = tolerance;
        self
    }

    /// Time between ticks: `1000 / max_fps` milliseconds, at least 1 ms
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        let millis = 1000 / u64::from(self.max_fps.max(1));
        Duration::from_millis(millis.max(1))
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error for a zero-sized display, zero fps or a tolerance that
    /// is negative or not finite
    pub fn validate(&self) -> Result<()> {
        if self.display_size.width == 0 || self.display_size.height == 0 {
            return Err(MirrorError::InvalidConfiguration(format!(
                "display size {} has a zero dimension",
                self.display_size
            )));
        }
        if self.max_fps == 0 {
            return Err(MirrorError::InvalidConfiguration(
                "max_fps must be greater than 0".to_string(),
            ));
        }
        if !self.orientation_tolerance.is_finite() || self.orientation_tolerance < 0.0 {
            return Err(MirrorError::InvalidConfiguration(format!(
                "invalid orientation tolerance {}",
                self.orientation_tolerance
            )));
        }
        Ok(())
    }
}

/// Where frames end up: a window, a log, a test recorder
pub trait RenderSurface {
    /// Window size changed after an orientation flip
    fn resize(&mut self, size: Size);

    /// Show `frame` scaled to `view`
    fn present(&mut self, frame: &Frame, view: Size);

    /// Stream ended; tear the surface down
    fn close(&mut self);
}

/// What the host timer should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Schedule the next tick
    Reschedule,
    /// The stream stopped and the surface was closed
    Teardown,
}

/// Presentation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationStatistics {
    /// Ticks run
    pub ticks: u64,
    /// Frames handed to the surface
    pub frames_presented: u64,
    /// Orientation flips observed
    pub orientation_changes: u64,
}

/// Periodic render step over a shared [`StreamState`]
pub struct PresentationLoop {
    config: PresentationConfig,
    state: Arc<StreamState>,
    geometry: ViewGeometry,
    stats: PresentationStatistics,
    torn_down: bool,
}

impl PresentationLoop {
    /// Create a loop sampling `state`
    #[must_use]
    pub fn new(config: PresentationConfig, state: Arc<StreamState>) -> Self {
        let geometry =
            ViewGeometry::new(config.display_size).with_tolerance(config.orientation_tolerance);
        Self {
            config,
            state,
            geometry,
            stats: PresentationStatistics::default(),
            torn_down: false,
        }
    }

    /// Run one tick against `surface`
    ///
    /// Never blocks on decode or I/O. A tick without a frame does nothing.
    /// Teardown is requested only once the stream has been stopped; an
    /// idle, not yet started stream keeps the loop scheduled.
    pub fn tick<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) -> TickOutcome {
        if self.torn_down {
            return TickOutcome::Teardown;
        }
        self.stats.ticks += 1;

        let frame = if self.config.render_only_new_frames {
            self.state.pull_if_new()
        } else {
            self.state.pull()
        };

        if let Some(frame) = frame {
            if self.geometry.update(frame.size()) {
                self.stats.orientation_changes += 1;
                surface.resize(self.geometry.view_size());
            }
            surface.present(&frame, self.geometry.view_size());
            self.stats.frames_presented += 1;
        }

        if self.state.lifecycle() == Lifecycle::Stopped {
            info!(
                "Stream stopped, closing view after {} frames",
                self.stats.frames_presented
            );
            self.torn_down = true;
            surface.close();
            return TickOutcome::Teardown;
        }

        TickOutcome::Reschedule
    }

    /// Map a click in view coordinates to device pixels
    ///
    /// `None` until the first frame has been shown, or for clicks outside
    /// the view.
    #[must_use]
    pub fn map_click(&self, view_x: f64, view_y: f64) -> Option<DevicePoint> {
        let point = self.geometry.map_click(view_x, view_y);
        if point.is_none() {
            debug!("Click ({:.1}, {:.1}) not mapped", view_x, view_y);
        }
        point
    }

    /// Newest decoded frame, without consuming it
    #[must_use]
    pub fn get_latest_frame(&self) -> Option<Arc<Frame>> {
        self.state.pull()
    }

    /// Current orientation
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.geometry.orientation()
    }

    /// Current view size
    #[must_use]
    pub fn view_size(&self) -> Size {
        self.geometry.view_size()
    }

    /// Current geometry
    #[must_use]
    pub fn geometry(&self) -> &ViewGeometry {
        &self.geometry
    }

    /// Loop configuration
    #[must_use]
    pub fn config(&self) -> &PresentationConfig {
        &self.config
    }

    /// Whether teardown already happened
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Statistics snapshot
    #[must_use]
    pub fn statistics(&self) -> PresentationStatistics {
        self.stats
    }
}
