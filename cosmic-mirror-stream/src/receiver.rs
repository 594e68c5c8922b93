//! Network stream receiver for the capture server's raw H.264 stream
//!
//! Handles the TCP connection and a dedicated receive/decode worker thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  4 KiB chunks  ┌───────────┐  NAL units  ┌─────────────┐  frames  ┌─────────────┐
//! │ TcpStream    │───────────────▶│ NalBuffer │────────────▶│ FrameDecoder│─────────▶│ StreamState │
//! │ (blocking)   │                └───────────┘             └─────────────┘          └─────────────┘
//! └──────────────┘
//!        ▲ shutdown() from stop()
//! ```
//!
//! The stream carries no framing besides Annex-B start codes and no
//! handshake. Reconnecting after a failure is left to the caller.

use crate::decoder::FrameDecoder;
use crate::error::{MirrorError, Result};
use crate::nal::{NalBuffer, NalKind, OwnedNal};
use crate::state::{Lifecycle, StreamState};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Receiver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Capture server host
    pub host: String,
    /// Capture server port
    pub port: u16,
    /// Maximum bytes per socket read
    pub chunk_size: usize,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Socket read timeout; bounds how long a stop request goes unnoticed
    pub read_timeout: Option<Duration>,
    /// How long `stop()` waits for the worker before abandoning it
    pub join_timeout: Duration,
    /// Pending demux bytes allowed before data is discarded
    pub max_pending_bytes: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1234,
            chunk_size: 4096,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_millis(250)),
            join_timeout: Duration::from_secs(1),
            max_pending_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ReceiverConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capture server host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the capture server port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the read chunk size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket read timeout (`None` blocks until data or close)
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the worker join timeout
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check values that would make the worker misbehave
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::InvalidConfiguration`] for a zero chunk size,
    /// zero timeouts or an empty host.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(MirrorError::InvalidConfiguration("host is empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(MirrorError::InvalidConfiguration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MirrorError::InvalidConfiguration(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| MirrorError::AddressResolution(format!("{}: {e}", self.address())))?
            .next()
            .ok_or_else(|| MirrorError::AddressResolution(self.address()))
    }
}

/// Live counters updated by the worker
#[derive(Debug, Default)]
struct ReceiverCounters {
    bytes_received: AtomicU64,
    chunks_received: AtomicU64,
    bytes_discarded: AtomicU64,
    parameter_sets: AtomicU64,
    keyframes: AtomicU64,
    non_keyframes: AtomicU64,
    other_units: AtomicU64,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

impl ReceiverCounters {
    fn record_unit(&self, kind: NalKind) {
        let counter = if kind.is_parameter_set() {
            &self.parameter_sets
        } else if kind.is_keyframe() {
            &self.keyframes
        } else if kind.is_slice() {
            &self.non_keyframes
        } else {
            &self.other_units
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiverStatistics {
        ReceiverStatistics {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            parameter_sets: self.parameter_sets.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            non_keyframes: self.non_keyframes.load(Ordering::Relaxed),
            other_units: self.other_units.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Receiver statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverStatistics {
    /// Raw bytes read from the socket
    pub bytes_received: u64,
    /// Number of non-empty reads
    pub chunks_received: u64,
    /// Bytes dropped by the pending cap
    pub bytes_discarded: u64,
    /// SPS/PPS units
    pub parameter_sets: u64,
    /// IDR slices
    pub keyframes: u64,
    /// Non-IDR slices
    pub non_keyframes: u64,
    /// Any other unit type
    pub other_units: u64,
    /// Frames produced by the decoder
    pub frames_decoded: u64,
    /// Units the decoder rejected
    pub decode_errors: u64,
}

impl ReceiverStatistics {
    /// All NAL units seen
    #[must_use]
    pub fn total_units(&self) -> u64 {
        self.parameter_sets + self.keyframes + self.non_keyframes + self.other_units
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
    socket: TcpStream,
}

/// Stream receiver that owns the TCP connection and the decode worker
pub struct StreamReceiver {
    config: ReceiverConfig,
    state: Arc<StreamState>,
    counters: Arc<ReceiverCounters>,
    worker: Option<Worker>,
}

impl StreamReceiver {
    /// Create a receiver publishing into `state`
    #[must_use]
    pub fn new(config: ReceiverConfig, state: Arc<StreamState>) -> Self {
        Self {
            config,
            state,
            counters: Arc::new(ReceiverCounters::default()),
            worker: None,
        }
    }

    /// Connect and launch the receive worker
    ///
    /// `make_decoder` runs on the worker thread, so the decoder itself does
    /// not have to be `Send`.
    ///
    /// # Errors
    ///
    /// Returns error if the receiver or its state was already started or
    /// stopped (before any connection attempt), the address cannot be
    /// resolved or the connection fails. On failure the stream state is
    /// never marked running.
    pub fn start<F, D>(&mut self, make_decoder: F) -> Result<()>
    where
        F: FnOnce() -> Result<D> + Send + 'static,
        D: FrameDecoder + 'static,
    {
        if self.worker.is_some() {
            return Err(MirrorError::StreamAlreadyStarted);
        }
        // The capture server accepts a single client; never connect for a
        // state that cannot be started
        match self.state.lifecycle() {
            Lifecycle::Idle => {}
            Lifecycle::Running => return Err(MirrorError::StreamAlreadyStarted),
            Lifecycle::Stopped => return Err(MirrorError::StreamStopped),
        }
        self.config.validate()?;

        let address = self.config.address();
        let addr = self.config.resolve().inspect_err(|e| {
            error!("Cannot start stream receiver: {}", e);
        })?;

        info!("Connecting to capture server at {}...", address);
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout).map_err(|e| {
            error!("Connection to capture server at {} failed: {}", address, e);
            MirrorError::ConnectionFailed {
                addr: address.clone(),
                reason: e.to_string(),
            }
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        stream.set_read_timeout(self.config.read_timeout)?;
        let control = stream.try_clone()?;

        self.state.start()?;
        info!("Connected to {}, waiting for video stream", address);

        let (done_tx, done_rx) = mpsc::channel();
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();

        let spawned = std::thread::Builder::new()
            .name("mirror-receive".to_string())
            .spawn(move || {
                match make_decoder() {
                    Ok(decoder) => {
                        debug!("Receive worker using {} decoder", decoder.name());
                        run_receive_loop(stream, decoder, &state, &counters, &config);
                    }
                    Err(e) => error!("Decoder init failed: {}", e),
                }
                state.stop();
                let _ = done_tx.send(());
                info!("Stream worker finished");
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    handle,
                    done: done_rx,
                    socket: control,
                });
                Ok(())
            }
            Err(e) => {
                self.state.stop();
                let _ = control.shutdown(Shutdown::Both);
                Err(MirrorError::Io(e))
            }
        }
    }

    /// Stop receiving
    ///
    /// Marks the state stopped, closes the socket and waits up to the join
    /// timeout for the worker. A worker that does not finish in time is
    /// detached; it exits on its own once the closed socket fails its read.
    /// Calling `stop` more than once is harmless.
    pub fn stop(&mut self) {
        self.state.stop();

        let Some(worker) = self.worker.take() else {
            return;
        };

        if let Err(e) = worker.socket.shutdown(Shutdown::Both) {
            // Already closed by the peer
            debug!("Socket shutdown: {}", e);
        }

        match worker.done.recv_timeout(self.config.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("Receive worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Receive worker did not finish within {:?}, detaching it",
                    self.config.join_timeout
                );
            }
        }

        let stats = self.statistics();
        info!(
            "Stream receiver stopped: {} bytes, {} units, {} frames, {} decode errors",
            stats.bytes_received,
            stats.total_units(),
            stats.frames_decoded,
            stats.decode_errors
        );
    }

    /// Whether the stream is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Shared stream state
    #[must_use]
    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// Receiver configuration
    #[must_use]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Statistics snapshot
    #[must_use]
    pub fn statistics(&self) -> ReceiverStatistics {
        self.counters.snapshot()
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read errors after which the next read may succeed
fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Worker body: read, demultiplex, decode, publish
fn run_receive_loop<D: FrameDecoder>(
    mut stream: TcpStream,
    mut decoder: D,
    state: &StreamState,
    counters: &ReceiverCounters,
    config: &ReceiverConfig,
) {
    let mut chunk = vec![0u8; config.chunk_size];
    let mut units = NalBuffer::new().with_max_pending(config.max_pending_bytes);
    let mut sequence = 0u64;

    while state.is_running() {
        let read = match stream.read(&mut chunk) {
            Ok(0) => {
                if state.is_running() {
                    info!("Capture server closed the stream");
                    if let Some(tail) = units.flush() {
                        let decoded =
                            decode_unit(&mut decoder, &tail, state, counters, &mut sequence);
                        if let Err(e) = decoded {
                            error!("Decoder failed on the final unit: {}", e);
                        }
                    }
                }
                break;
            }
            Ok(n) => n,
            Err(e) if is_transient(&e) => {
                trace!("Transient read error: {}", e);
                continue;
            }
            Err(e) => {
                if state.is_running() {
                    error!("Stream read failed: {}", e);
                } else {
                    debug!("Stream read ended by stop: {}", e);
                }
                break;
            }
        };

        counters.bytes_received.fetch_add(read as u64, Ordering::Relaxed);
        counters.chunks_received.fetch_add(1, Ordering::Relaxed);

        let discarded = units.extend(&chunk[..read]);
        if discarded > 0 {
            warn!("Pending limit exceeded, discarded {} bytes", discarded);
            counters
                .bytes_discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }

        for unit in units.drain_units() {
            if let Err(e) = decode_unit(&mut decoder, &unit, state, counters, &mut sequence) {
                error!("Decoder failed, ending stream: {}", e);
                return;
            }
        }
    }
}

/// Decode one unit and publish its frames
///
/// Recoverable decoder errors and frames with a short pixel buffer are
/// counted and skipped. Any other decoder error is returned.
fn decode_unit<D: FrameDecoder>(
    decoder: &mut D,
    unit: &OwnedNal,
    state: &StreamState,
    counters: &ReceiverCounters,
    sequence: &mut u64,
) -> Result<()> {
    let kind = unit.kind();
    counters.record_unit(kind);
    trace!("NAL unit: {} ({} bytes)", kind.name(), unit.data.len());

    let frames = match decoder.decode(&unit.data) {
        Ok(frames) => frames,
        Err(e) if e.is_recoverable() => {
            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Decode error on {} ({} bytes), skipping: {}",
                kind.name(),
                unit.data.len(),
                e
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for mut frame in frames {
        if !frame.is_complete() {
            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Decoder returned {} frame with {} bytes, skipping",
                frame.size(),
                frame.data.len()
            );
            continue;
        }
        frame.sequence = *sequence;
        *sequence += 1;
        counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Decoded frame {} ({}x{})",
            frame.sequence, frame.width, frame.height
        );
        state.push(frame);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn test_default_config() {
        let config = ReceiverConfig::default();
        assert_eq!(config.address(), "127.0.0.1:1234");
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.join_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ReceiverConfig::new()
            .with_host("localhost")
            .with_port(27183)
            .with_chunk_size(1024)
            .with_join_timeout(Duration::from_millis(200));
        assert_eq!(config.address(), "localhost:27183");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.join_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_config_validation() {
        assert!(ReceiverConfig::new().with_chunk_size(0).validate().is_err());
        assert!(ReceiverConfig::new().with_host("").validate().is_err());
        assert!(ReceiverConfig::new()
            .with_read_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
        assert!(ReceiverConfig::new().with_read_timeout(None).validate().is_ok());
    }

    #[test]
    fn test_unit_classification_counters() {
        let counters = ReceiverCounters::default();
        counters.record_unit(NalKind::Sps);
        counters.record_unit(NalKind::Pps);
        counters.record_unit(NalKind::IdrSlice);
        counters.record_unit(NalKind::NonIdrSlice);
        counters.record_unit(NalKind::NonIdrSlice);
        counters.record_unit(NalKind::Sei);

        let stats = counters.snapshot();
        assert_eq!(stats.parameter_sets, 2);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.non_keyframes, 2);
        assert_eq!(stats.other_units, 1);
        assert_eq!(stats.total_units(), 6);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(is_transient(&std::io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::ConnectionReset)));
    }

    /// Replays canned decoder results
    struct ScriptedDecoder(Vec<Result<Vec<Frame>>>);

    impl FrameDecoder for ScriptedDecoder {
        fn decode(&mut self, _unit: &[u8]) -> Result<Vec<Frame>> {
            self.0.remove(0)
        }
    }

    fn idr_unit() -> OwnedNal {
        OwnedNal {
            nal_type: 5,
            data: vec![0, 0, 0, 1, 0x65, 0x88],
        }
    }

    #[test]
    fn test_decode_unit_skips_incomplete_frames() {
        let state = StreamState::new();
        let counters = ReceiverCounters::default();
        let mut sequence = 0;
        let mut decoder = ScriptedDecoder(vec![Ok(vec![
            Frame::new(2, 2, vec![0; 12], 0),
            Frame::new(2, 2, vec![0; 16], 0),
        ])]);

        decode_unit(&mut decoder, &idr_unit(), &state, &counters, &mut sequence).unwrap();

        let stats = counters.snapshot();
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(sequence, 1);
        assert_eq!(state.pull().unwrap().sequence, 0);
    }

    #[test]
    fn test_decode_unit_error_classification() {
        let state = StreamState::new();
        let counters = ReceiverCounters::default();
        let mut sequence = 0;
        let mut decoder = ScriptedDecoder(vec![
            Err(MirrorError::Decode("corrupt slice".to_string())),
            Err(MirrorError::Io(std::io::Error::from(ErrorKind::OutOfMemory))),
        ]);

        assert!(decode_unit(&mut decoder, &idr_unit(), &state, &counters, &mut sequence).is_ok());
        assert_eq!(counters.snapshot().decode_errors, 1);

        let err = decode_unit(&mut decoder, &idr_unit(), &state, &counters, &mut sequence)
            .unwrap_err();
        assert!(matches!(err, MirrorError::Io(_)));
        assert_eq!(counters.snapshot().decode_errors, 1);
        assert!(state.pull().is_none());
    }

    #[test]
    fn test_stop_without_start_is_idempotent() {
        let state = Arc::new(StreamState::new());
        let mut receiver = StreamReceiver::new(ReceiverConfig::default(), Arc::clone(&state));
        receiver.stop();
        receiver.stop();
        assert!(!receiver.is_running());
        assert_eq!(receiver.statistics(), ReceiverStatistics::default());
    }
}
