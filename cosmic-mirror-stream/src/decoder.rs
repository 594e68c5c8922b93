//! Video decoder interface
//!
//! The pipeline treats H.264 reconstruction as an opaque step: it hands the
//! decoder one Annex-B NAL unit at a time and receives zero or more frames in
//! emission order. Parameter sets and partial access units produce no frames.
//!
//! With the `h264` feature enabled, [`OpenH264Decoder`] provides a software
//! decoder. Tests substitute a deterministic fake.

use crate::error::Result;
use crate::frame::Frame;

/// Decoder accepting Annex-B NAL units
///
/// Implementations are created and used on the receive worker thread only,
/// so they need not be `Send`.
pub trait FrameDecoder {
    /// Decode one NAL unit (start code included)
    ///
    /// # Errors
    ///
    /// Returns [`crate::MirrorError::Decode`] for malformed input. The caller
    /// logs it and continues with the next unit. Any other error ends the
    /// stream.
    fn decode(&mut self, unit: &[u8]) -> Result<Vec<Frame>>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "decoder"
    }
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn decode(&mut self, unit: &[u8]) -> Result<Vec<Frame>> {
        (**self).decode(unit)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(feature = "h264")]
pub use self::openh264_impl::OpenH264Decoder;

#[cfg(feature = "h264")]
mod openh264_impl {
    use super::FrameDecoder;
    use crate::error::{MirrorError, Result};
    use crate::frame::Frame;
    use openh264::decoder::Decoder;
    use openh264::formats::YUVSource;
    use tracing::debug;

    /// Software H.264 decoder backed by Cisco's OpenH264
    pub struct OpenH264Decoder {
        decoder: Decoder,
        frames_decoded: u64,
    }

    impl OpenH264Decoder {
        /// Create a new decoder
        ///
        /// # Errors
        ///
        /// Returns error if the OpenH264 decoder cannot be initialized
        pub fn new() -> Result<Self> {
            let decoder = Decoder::new()
                .map_err(|e| MirrorError::Decode(format!("OpenH264 init failed: {e}")))?;
            debug!("OpenH264 decoder created");
            Ok(Self {
                decoder,
                frames_decoded: 0,
            })
        }
    }

    impl FrameDecoder for OpenH264Decoder {
        #[allow(clippy::cast_possible_truncation)]
        fn decode(&mut self, unit: &[u8]) -> Result<Vec<Frame>> {
            let yuv = match self.decoder.decode(unit) {
                Ok(Some(yuv)) => yuv,
                Ok(None) => return Ok(Vec::new()),
                Err(e) => return Err(MirrorError::Decode(e.to_string())),
            };

            let (width, height) = yuv.dimensions();
            let mut rgba = vec![0u8; width * height * Frame::BYTES_PER_PIXEL];
            yuv.write_rgba8(&mut rgba);

            let frame = Frame::new(width as u32, height as u32, rgba, self.frames_decoded);
            self.frames_decoded += 1;
            Ok(vec![frame])
        }

        fn name(&self) -> &'static str {
            "openh264"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;

    struct CountingDecoder {
        calls: usize,
    }

    impl FrameDecoder for CountingDecoder {
        fn decode(&mut self, unit: &[u8]) -> Result<Vec<Frame>> {
            self.calls += 1;
            if unit.is_empty() {
                return Err(MirrorError::Decode("empty unit".to_string()));
            }
            Ok(vec![Frame::new(1, 1, vec![0; 4], 0)])
        }
    }

    #[test]
    fn test_boxed_decoder_delegates() {
        let mut decoder: Box<dyn FrameDecoder> = Box::new(CountingDecoder { calls: 0 });
        assert_eq!(decoder.name(), "decoder");
        assert_eq!(decoder.decode(&[0, 0, 0, 1, 0x65]).unwrap().len(), 1);
        assert!(decoder.decode(&[]).is_err());
    }
}
