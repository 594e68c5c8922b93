//! Raw stream analyzer
//!
//! Captures the capture server's raw H.264 stream without decoding it,
//! optionally records it to disk (playable with `ffplay -f h264` or
//! `vlc --demux=h264`), and summarizes NAL units and frame types.

use crate::config::Config;
use crate::diagnostics::format_bytes;
use anyhow::{Context, Result};
use cosmic_mirror_stream::{CaptureServer, NalBuffer, NalKind, OwnedNal};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read timeout when the receiver settings block forever; bounds how long
/// a cancellation goes unnoticed
const CANCEL_POLL: Duration = Duration::from_secs(1);

/// Analyzer options
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Raw stream destination
    pub output: Option<PathBuf>,
    /// Frame limit, 0 for none
    pub max_frames: u64,
    /// Per-frame report destination
    pub report: Option<PathBuf>,
    /// Log each frame
    pub details: bool,
}

/// One slice in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    /// 1-based frame number
    pub number: u64,
    /// IDR slice
    pub keyframe: bool,
    /// Unit size including start code
    pub size: usize,
}

/// Accumulated stream analysis
#[derive(Debug, Default)]
pub struct StreamAnalysis {
    bytes: u64,
    bytes_discarded: u64,
    unit_counts: BTreeMap<u8, u64>,
    frames: Vec<FrameRecord>,
}

impl StreamAnalysis {
    /// Account for one unit
    pub fn record(&mut self, unit: &OwnedNal) -> Option<FrameRecord> {
        *self.unit_counts.entry(unit.nal_type).or_default() += 1;

        let kind = unit.kind();
        if !matches!(kind, NalKind::IdrSlice | NalKind::NonIdrSlice) {
            return None;
        }
        let record = FrameRecord {
            number: self.frames.len() as u64 + 1,
            keyframe: kind.is_keyframe(),
            size: unit.data.len(),
        };
        self.frames.push(record);
        Some(record)
    }

    /// Slice frames seen
    pub fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    /// IDR frames seen
    pub fn keyframes(&self) -> u64 {
        self.frames.iter().filter(|frame| frame.keyframe).count() as u64
    }

    /// Non-IDR frames seen
    pub fn predicted_frames(&self) -> u64 {
        self.frame_count() - self.keyframes()
    }

    /// All units seen
    pub fn total_units(&self) -> u64 {
        self.unit_counts.values().sum()
    }

    /// Bytes read from the stream
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Bytes dropped by the pending cap
    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Analysis complete:");
        let _ = writeln!(out, "  Stream size: {}", format_bytes(self.bytes));
        if self.bytes_discarded > 0 {
            let _ = writeln!(out, "  Discarded: {}", format_bytes(self.bytes_discarded));
        }
        let _ = writeln!(out, "  Total frames: {}", self.frame_count());
        let _ = writeln!(out, "  Keyframes (I-frames): {}", self.keyframes());
        let _ = writeln!(out, "  P-frames: {}", self.predicted_frames());
        let _ = writeln!(out, "  Total NAL units: {}", self.total_units());
        let _ = writeln!(out, "NAL unit summary:");
        for (nal_type, count) in &self.unit_counts {
            let _ = writeln!(out, "  {}: {}", NalKind::from_type(*nal_type).name(), count);
        }
        out
    }

    /// Per-frame report
    pub fn frame_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Frame Analysis Report");
        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "Total Frames: {}", self.frame_count());
        let _ = writeln!(out, "Keyframes (I-frames): {}", self.keyframes());
        let _ = writeln!(out, "P-frames: {}", self.predicted_frames());
        let _ = writeln!(out);
        let _ = writeln!(out, "Frame Details:");
        let _ = writeln!(out, "{}", "-".repeat(50));
        for frame in &self.frames {
            let frame_type = if frame.keyframe { "I-frame" } else { "P-frame" };
            let _ = writeln!(
                out,
                "Frame {:5}: {:8} | Size: {:8} bytes",
                frame.number, frame_type, frame.size
            );
        }
        out
    }
}

/// Read `reader` until it ends, `max_frames` slices were seen, or `cancel`
/// fires, teeing raw bytes into `sink`
///
/// Read timeouts are retried so `cancel` is polled on an idle stream. At
/// most `max_pending_bytes` are held while waiting for a unit to complete.
pub fn analyze<R: Read>(
    mut reader: R,
    mut sink: Option<&mut dyn Write>,
    options: &AnalyzeOptions,
    max_pending_bytes: usize,
    cancel: &CancellationToken,
) -> Result<StreamAnalysis> {
    let mut analysis = StreamAnalysis::default();
    let mut units = NalBuffer::new().with_max_pending(max_pending_bytes);
    let mut chunk = [0u8; 4096];
    let limit_reached =
        |analysis: &StreamAnalysis| options.max_frames > 0 && analysis.frame_count() >= options.max_frames;

    while !cancel.is_cancelled() && !limit_reached(&analysis) {
        let read = match reader.read(&mut chunk) {
            Ok(0) => {
                info!("Stream ended");
                for unit in units.flush() {
                    record_unit(&mut analysis, &unit, options.details);
                }
                break;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => return Err(e).context("Stream read failed"),
        };

        if let Some(sink) = sink.as_mut() {
            sink.write_all(&chunk[..read])
                .context("Failed to write raw stream")?;
        }
        analysis.bytes += read as u64;

        if analysis.bytes == read as u64 {
            let preview: Vec<String> = chunk[..read.min(32)]
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect();
            debug!("First bytes: {}", preview.join(" "));
        }

        let discarded = units.extend(&chunk[..read]);
        if discarded > 0 {
            warn!("Pending limit exceeded, discarded {} bytes", discarded);
            analysis.bytes_discarded += discarded as u64;
        }
        for unit in units.drain_units() {
            record_unit(&mut analysis, &unit, options.details);
            if limit_reached(&analysis) {
                break;
            }
        }
    }

    if let Some(sink) = sink {
        sink.flush().context("Failed to flush raw stream")?;
    }
    Ok(analysis)
}

fn record_unit(analysis: &mut StreamAnalysis, unit: &OwnedNal, details: bool) {
    match analysis.record(unit) {
        Some(frame) if details => info!(
            "[Frame {}] Type: {}, Size: {} bytes",
            frame.number,
            unit.kind().name(),
            frame.size
        ),
        Some(_) => {}
        None => debug!("NAL unit: {} ({} bytes)", unit.kind().name(), unit.data.len()),
    }
}

/// Start the capture server if enabled, connect and analyze until done
pub fn run(config: &Config, options: &AnalyzeOptions, cancel: &CancellationToken) -> Result<()> {
    let mut server = if config.server.enabled {
        let mut server = CaptureServer::new(config.adb_device(), config.server_config());
        server.start().context("Failed to start capture server")?;
        Some(server)
    } else {
        None
    };

    let receiver = config.receiver_config();
    let address = receiver.address();
    let addr = address
        .to_socket_addrs()
        .with_context(|| format!("Could not resolve address '{address}'"))?
        .next()
        .with_context(|| format!("No socket address for '{address}'"))?;

    info!("Connecting to {}", address);
    let stream = TcpStream::connect_timeout(&addr, receiver.connect_timeout)
        .with_context(|| format!("Failed to connect to capture server at {address}"))?;
    stream
        .set_read_timeout(Some(receiver.read_timeout.unwrap_or(CANCEL_POLL)))
        .context("Failed to set read timeout")?;
    info!("Connected to capture server");

    let mut file = match &options.output {
        Some(path) => Some(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let analysis = analyze(
        stream,
        file.as_mut().map(|f| f as &mut dyn Write),
        options,
        receiver.max_pending_bytes,
        cancel,
    )?;

    if let Some(server) = server.as_mut() {
        server.stop();
    }

    print!("{}", analysis.summary());
    if let Some(path) = &options.output {
        println!("Raw stream written to {}", path.display());
    }
    if let Some(path) = &options.report {
        std::fs::write(path, analysis.frame_report())
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("Frame report written to {}", path.display());
    }
    if analysis.frame_count() == 0 {
        warn!("No frames captured");
    }

    Ok(())
}
