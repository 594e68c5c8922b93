//! COSMIC Mirror Stream - Android Screen Mirroring Pipeline
//!
//! This crate implements the receive side of Android screen mirroring: it
//! reads the raw H.264 stream a scrcpy capture server emits over TCP, decodes
//! it, and hands the newest frame to a render loop that also maps clicks back
//! to device taps.
//!
//! ## Architecture
//!
//! ```text
//!  capture server ──TCP──▶ StreamReceiver (worker thread)
//!                            │  NalBuffer / find_units
//!                            │  FrameDecoder
//!                            ▼
//!                          StreamState (single slot, latest wins)
//!                            │
//!            host timer ──▶ PresentationLoop::tick ──▶ RenderSurface
//!                            │
//!            view click ──▶ map_click ──▶ TapDispatcher ──▶ adb input tap
//! ```
//!
//! Two executions run concurrently: the receive worker (blocking reads and
//! decode) and the presentation loop on the UI thread. They meet only at the
//! [`StreamState`] slot, whose lock is held for a pointer swap.
//!
//! ## Usage Example
//!
//! ```no_run
//! use cosmic_mirror_stream::{
//!     FrameDecoder, PresentationConfig, PresentationLoop, ReceiverConfig, StreamReceiver,
//!     StreamState,
//! };
//! use std::sync::Arc;
//!
//! # fn make_decoder() -> cosmic_mirror_stream::Result<Box<dyn FrameDecoder>> { unimplemented!() }
//! # fn main() -> cosmic_mirror_stream::Result<()> {
//! let state = Arc::new(StreamState::new());
//! let mut receiver = StreamReceiver::new(ReceiverConfig::default(), Arc::clone(&state));
//! receiver.start(make_decoder)?;
//!
//! let presentation = PresentationLoop::new(PresentationConfig::default(), state);
//! // Drive presentation.tick(&mut surface) from the UI timer
//! # drop(presentation);
//! receiver.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `h264`: software decoding through OpenH264 (`OpenH264Decoder`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod decoder;
pub mod device;
pub mod error;
pub mod frame;
pub mod input;
pub mod nal;
pub mod presentation;
pub mod receiver;
pub mod schedule;
pub mod server;
pub mod state;

pub use decoder::FrameDecoder;
#[cfg(feature = "h264")]
pub use decoder::OpenH264Decoder;
pub use device::{AdbDevice, DeviceCommander, TapDispatcher, TapStatistics};
pub use error::{MirrorError, Result};
pub use frame::{Frame, Size};
pub use input::{detect_orientation, map_click, DevicePoint, Orientation, ViewGeometry};
pub use nal::{find_units, NalBuffer, NalKind, NalUnit, OwnedNal};
pub use presentation::{
    PresentationConfig, PresentationLoop, PresentationStatistics, RenderSurface, TickOutcome,
};
pub use receiver::{ReceiverConfig, ReceiverStatistics, StreamReceiver};
pub use schedule::{run_every, ScheduleExit};
pub use server::{CaptureServer, CaptureServerConfig};
pub use state::{FrameListener, Lifecycle, StreamState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
