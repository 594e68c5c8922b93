//! Click mapping from the mirror window to device pixels
//!
//! Clicks arrive in view coordinates (pixels inside the mirror window). The
//! device expects taps in the pixel space of the frames it streams, so every
//! click is scaled by `device / view` on each axis and rounded.
//!
//! ## Orientation
//!
//! The window is configured for a portrait device. When the device rotates,
//! the capture server starts emitting landscape frames. Orientation is
//! detected by comparing aspect ratios:
//!
//! ```text
//! ratio = (frame_w / frame_h) / (display_w / display_h)
//!
//! |ratio - 1| <= tolerance  -> Portrait   (view = display)
//! otherwise                 -> Landscape  (view = display swapped)
//! ```
//!
//! Encoders round frame dimensions (to multiples of 8 or 16), so an exact
//! comparison would misfire; [`DEFAULT_ORIENTATION_TOLERANCE`] absorbs that.
//!
//! ## Example Mapping
//!
//! ```text
//! Device frame: 1080x2400, window: 360x800 (portrait)
//!
//! Click at (180, 400) maps to:
//!   device_x = round(180 / 360 * 1080) = 540
//!   device_y = round(400 / 800 * 2400) = 1200
//! ```

use crate::frame::Size;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Allowed relative deviation between frame and display aspect ratios
/// before a frame is treated as rotated
pub const DEFAULT_ORIENTATION_TOLERANCE: f64 = 0.05;

/// Device orientation relative to the configured window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Frames match the configured window shape
    #[default]
    Portrait,
    /// Frames are rotated relative to the configured window
    Landscape,
}

impl Orientation {
    /// Window size to use for `display` in this orientation
    #[must_use]
    pub fn view_size(self, display: Size) -> Size {
        match self {
            Self::Portrait => display,
            Self::Landscape => display.swapped(),
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Portrait => write!(f, "portrait"),
            Self::Landscape => write!(f, "landscape"),
        }
    }
}

/// Derive orientation from a frame and the configured display size
///
/// Returns `None` when either size has a zero dimension.
#[must_use]
pub fn detect_orientation(frame: Size, display_size: Size, tolerance: f64) -> Option<Orientation> {
    let ratio = frame.aspect_ratio()? / display_size.aspect_ratio()?;
    trace!("Aspect ratio {} vs {}: {:.4}", frame, display_size, ratio);

    if (ratio - 1.0).abs() <= tolerance {
        Some(Orientation::Portrait)
    } else {
        Some(Orientation::Landscape)
    }
}

/// Tap position in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePoint {
    /// Horizontal device pixel
    pub x: u32,
    /// Vertical device pixel
    pub y: u32,
}

impl DevicePoint {
    /// Create a new point
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for DevicePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Convert a click in the view into device pixels
///
/// `view` and `device` must both already reflect the current orientation.
/// Returns `None` for a degenerate view or a click outside it.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn map_click(view_x: f64, view_y: f64, view: Size, device: Size) -> Option<DevicePoint> {
    if view.width == 0 || view.height == 0 {
        return None;
    }
    let (view_w, view_h) = (f64::from(view.width), f64::from(view.height));
    if !(0.0..=view_w).contains(&view_x) || !(0.0..=view_h).contains(&view_y) {
        debug!(
            "Click ({:.1}, {:.1}) outside view {}, ignoring",
            view_x, view_y, view
        );
        return None;
    }

    // Non-negative and bounded by the device size, so the casts are exact
    let x = (view_x / view_w * f64::from(device.width)).round() as u32;
    let y = (view_y / view_h * f64::from(device.height)).round() as u32;

    trace!(
        "Click mapping: ({:.1}, {:.1}) in {} -> ({}, {}) in {}",
        view_x,
        view_y,
        view,
        x,
        y,
        device
    );
    Some(DevicePoint::new(x, y))
}

/// Orientation, view size and device frame size, always updated together
///
/// Owned by the presentation loop. A click mapped through this type uses the
/// frame size of the frame currently shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    display: Size,
    tolerance: f64,
    orientation: Orientation,
    device: Option<Size>,
}

impl ViewGeometry {
    /// Geometry for a window configured at `display`, before any frame
    #[must_use]
    pub fn new(display: Size) -> Self {
        Self {
            display,
            tolerance: DEFAULT_ORIENTATION_TOLERANCE,
            orientation: Orientation::Portrait,
            device: None,
        }
    }

    /// Override the orientation tolerance
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Record the size of the frame about to be shown
    ///
    /// Returns `true` if the orientation changed. Degenerate frame sizes are
    /// ignored.
    pub fn update(&mut self, frame: Size) -> bool {
        let Some(orientation) = detect_orientation(frame, self.display, self.tolerance) else {
            debug!("Ignoring degenerate frame size {}", frame);
            return false;
        };

        self.device = Some(frame);
        if orientation == self.orientation {
            return false;
        }

        debug!(
            "Orientation changed: {} -> {} (frame {}, view {})",
            self.orientation,
            orientation,
            frame,
            orientation.view_size(self.display)
        );
        self.orientation = orientation;
        true
    }

    /// Map a view click to device pixels; `None` until a frame was shown
    #[must_use]
    pub fn map_click(&self, view_x: f64, view_y: f64) -> Option<DevicePoint> {
        map_click(view_x, view_y, self.view_size(), self.device?)
    }

    /// Current orientation
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Current window size
    #[must_use]
    pub fn view_size(&self) -> Size {
        self.orientation.view_size(self.display)
    }

    /// Size of the last shown frame
    #[must_use]
    pub fn device_size(&self) -> Option<Size> {
        self.device
    }

    /// Configured window size
    #[must_use]
    pub fn display_size(&self) -> Size {
        self.display
    }
}
