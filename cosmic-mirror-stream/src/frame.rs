//! Decoded video frame and pixel geometry types

use serde::{Deserialize, Serialize};

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Size {
    /// Create a new size
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same size with width and height exchanged
    #[must_use]
    pub const fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    /// Width divided by height, `None` for a degenerate size
    #[must_use]
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded video frame
///
/// Pixels are tightly packed RGBA, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// RGBA pixel data (4 bytes per pixel)
    pub data: Vec<u8>,
    /// Position in decode order, starting at 0
    pub sequence: u64,
}

impl Frame {
    /// Bytes per RGBA pixel
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a new frame
    #[must_use]
    pub fn new(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data,
            sequence,
        }
    }

    /// Frame dimensions
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether `data` holds exactly `width * height` RGBA pixels
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * Self::BYTES_PER_PIXEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_helpers() {
        let size = Size::new(1080, 2400);
        assert_eq!(size.swapped(), Size::new(2400, 1080));
        assert_eq!(size.aspect_ratio(), Some(0.45));
        assert_eq!(Size::new(0, 10).aspect_ratio(), None);
        assert_eq!(size.to_string(), "1080x2400");
        assert_eq!(Size::from((360, 800)), Size::new(360, 800));
    }

    #[test]
    fn test_frame_completeness() {
        let frame = Frame::new(2, 2, vec![0; 16], 0);
        assert!(frame.is_complete());
        assert_eq!(frame.size(), Size::new(2, 2));

        let truncated = Frame::new(2, 2, vec![0; 12], 1);
        assert!(!truncated.is_complete());
    }
}
