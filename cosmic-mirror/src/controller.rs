//! Mirror session wiring
//!
//! Owns one mirroring session: the capture server on the device, the
//! stream receiver feeding the shared frame slot, and the tap dispatcher.
//! Presentation loops are created per view and only read the slot.

use crate::config::Config;
use anyhow::{Context, Result};
use cosmic_mirror_stream::{
    CaptureServer, DeviceCommander, DevicePoint, FrameDecoder, PresentationLoop,
    ReceiverStatistics, StreamReceiver, StreamState, TapDispatcher, TapStatistics,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Decoder used by the binary
#[cfg(feature = "h264")]
pub fn default_decoder() -> cosmic_mirror_stream::Result<Box<dyn FrameDecoder>> {
    let decoder = cosmic_mirror_stream::OpenH264Decoder::new()?;
    Ok(Box::new(decoder))
}

/// Decoder used by the binary
#[cfg(not(feature = "h264"))]
pub fn default_decoder() -> cosmic_mirror_stream::Result<Box<dyn FrameDecoder>> {
    Err(cosmic_mirror_stream::MirrorError::Decode(
        "built without the h264 feature".to_string(),
    ))
}

/// One mirroring session
pub struct MirrorController {
    config: Config,
    server: Option<CaptureServer>,
    receiver: StreamReceiver,
    state: Arc<StreamState>,
    taps: TapDispatcher,
}

impl MirrorController {
    /// Session that taps through `adb`
    pub fn new(config: Config) -> Self {
        let commander: Arc<dyn DeviceCommander> = Arc::new(config.adb_device());
        Self::with_commander(config, commander)
    }

    /// Session that taps through `commander`
    pub fn with_commander(config: Config, commander: Arc<dyn DeviceCommander>) -> Self {
        let state = Arc::new(StreamState::new());
        let receiver = StreamReceiver::new(config.receiver_config(), Arc::clone(&state));
        Self {
            config,
            server: None,
            receiver,
            state,
            taps: TapDispatcher::new(commander),
        }
    }

    /// Launch the capture server (unless disabled) and connect to it
    ///
    /// If the receiver cannot connect the server is shut down again.
    pub fn start<F, D>(&mut self, make_decoder: F) -> Result<()>
    where
        F: FnOnce() -> cosmic_mirror_stream::Result<D> + Send + 'static,
        D: FrameDecoder + 'static,
    {
        if self.config.server.enabled && self.server.is_none() {
            let mut server = CaptureServer::new(self.config.adb_device(), self.config.server_config());
            server
                .start()
                .context("Failed to start capture server on the device")?;
            self.server = Some(server);
        } else if !self.config.server.enabled {
            info!("Capture server management disabled, connecting directly");
        }

        if let Err(e) = self.receiver.start(make_decoder) {
            if let Some(mut server) = self.server.take() {
                server.stop();
            }
            return Err(e).with_context(|| {
                format!(
                    "Failed to connect to capture server at {}",
                    self.receiver.config().address()
                )
            });
        }

        info!("Mirroring started");
        Ok(())
    }

    /// New presentation loop over this session's frames
    pub fn presentation(&self) -> PresentationLoop {
        PresentationLoop::new(self.config.presentation_config(), Arc::clone(&self.state))
    }

    /// Map a view click through `presentation` and send the tap
    pub fn on_click(
        &self,
        presentation: &PresentationLoop,
        view_x: f64,
        view_y: f64,
    ) -> Option<DevicePoint> {
        let point = presentation.map_click(view_x, view_y)?;
        // Detached; the dispatcher counts the outcome
        drop(self.taps.on_click(point));
        Some(point)
    }

    /// Stop receiving, then shut the capture server down
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        self.receiver.stop();
        if let Some(mut server) = self.server.take() {
            if !server.stop() {
                warn!("Capture server had already exited");
            }
        }
    }

    /// Shared frame slot
    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// Session configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Receiver and tap statistics
    pub fn statistics(&self) -> (ReceiverStatistics, TapStatistics) {
        (self.receiver.statistics(), self.taps.statistics())
    }
}

impl Drop for MirrorController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;
    use cosmic_mirror_stream::{
        Frame, Lifecycle, MirrorError, NalKind, RenderSurface, Size, TickOutcome,
    };
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    struct PortraitDecoder;

    impl FrameDecoder for PortraitDecoder {
        fn decode(&mut self, unit: &[u8]) -> cosmic_mirror_stream::Result<Vec<Frame>> {
            if NalKind::from_type(unit[4] & 0x1F).is_slice() {
                Ok(vec![Frame::new(108, 240, vec![0; 108 * 240 * 4], 0)])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[derive(Default)]
    struct RecordingCommander {
        taps: Mutex<Vec<DevicePoint>>,
    }

    impl DeviceCommander for RecordingCommander {
        fn tap(&self, point: DevicePoint) -> cosmic_mirror_stream::Result<()> {
            self.taps.lock().unwrap().push(point);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullSurface {
        presented: usize,
        closed: bool,
    }

    impl RenderSurface for NullSurface {
        fn resize(&mut self, _size: Size) {}

        fn present(&mut self, _frame: &Frame, _view: Size) {
            self.presented += 1;
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn direct_config(port: u16) -> Config {
        Config::default().with_overrides(&CliOverrides {
            port: Some(port),
            no_server: true,
            ..CliOverrides::default()
        })
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_session_presents_and_taps() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(&[0, 0, 0, 1, 0x67, 0x42]).unwrap();
            socket.write_all(&[0, 0, 0, 1, 0x65, 0x88, 0x84]).unwrap();
            socket.write_all(&[0, 0, 0, 1, 0x41, 0x9A]).unwrap();
        });

        let commander = Arc::new(RecordingCommander::default());
        let mut controller = MirrorController::with_commander(
            direct_config(port),
            Arc::clone(&commander) as Arc<dyn DeviceCommander>,
        );
        controller.start(|| Ok(PortraitDecoder)).unwrap();
        server.join().unwrap();

        let state = Arc::clone(controller.state());
        assert!(wait_until(Duration::from_secs(5), || {
            state.lifecycle() == Lifecycle::Stopped
        }));

        let mut presentation = controller.presentation();
        let mut surface = NullSurface::default();
        assert_eq!(presentation.tick(&mut surface), TickOutcome::Teardown);
        assert_eq!(surface.presented, 1);
        assert!(surface.closed);

        let point = controller.on_click(&presentation, 180.0, 400.0).unwrap();
        assert_eq!(point, DevicePoint::new(54, 120));
        assert!(controller.on_click(&presentation, 500.0, 400.0).is_none());

        assert!(wait_until(Duration::from_secs(5), || {
            controller.statistics().1.succeeded == 1
        }));
        assert_eq!(*commander.taps.lock().unwrap(), vec![DevicePoint::new(54, 120)]);

        let (receiver, taps) = controller.statistics();
        assert_eq!(receiver.frames_decoded, 2);
        assert_eq!(taps.dispatched, 1);
    }

    #[test]
    fn test_start_fails_without_server() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut controller = MirrorController::with_commander(
            direct_config(port),
            Arc::new(RecordingCommander::default()),
        );

        let err = controller.start(|| Ok(PortraitDecoder)).unwrap_err();
        assert!(err.to_string().contains("Failed to connect"));
        assert!(matches!(
            err.downcast_ref::<MirrorError>(),
            Some(MirrorError::ConnectionFailed { .. })
        ));
        assert_eq!(controller.state().lifecycle(), Lifecycle::Idle);

        controller.stop();
        controller.stop();
    }

    #[test]
    fn test_click_before_first_frame_is_ignored() {
        let controller = MirrorController::with_commander(
            direct_config(1234),
            Arc::new(RecordingCommander::default()),
        );
        let presentation = controller.presentation();
        assert!(controller.on_click(&presentation, 10.0, 10.0).is_none());
        assert_eq!(controller.statistics().1.dispatched, 0);
    }
}
