//! Video pipeline: compressed access units in, presentable YUV frames out.
//!
//! The decoder and scaler are external; this module sequences them.
//!
//! ```text
//! engine thread                                      driver thread
//! ─────────────                                      ─────────────
//! on_video_packet(bytes)
//!   submit ─► Saturated? drain one, retry
//!   drain all ─► keep newest
//!   scale ─► private output buffer
//!   publish ═══════ watch<Option<Arc<VideoFrame>>> ═══► FrameReceiver::latest()
//!   reclaim previous buffer if the reader let go
//! ```
//!
//! The writer never waits for the reader: publishing swaps an `Arc` under
//! the channel's lock and the reader only ever clones that `Arc`, so a
//! frame the reader holds is never written to again.

use std::sync::Arc;

use tokio::sync::watch;

use crate::engine::VideoSink;
use crate::error::RpsError;
use crate::host::VideoResolution;

/// Default presentation size.
pub const DEFAULT_OUTPUT_SIZE: (u32, u32) = (1280, 720);

/// Row alignment used for output planes.
const LINE_ALIGN: usize = 32;

// ── Configuration ────────────────────────────────────────────────

/// Geometry negotiated for one session. The bitstream is always H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    /// Decode input size, from the resolution preset.
    pub source_width: u32,
    pub source_height: u32,
    /// Scaler output size (YUV 4:2:0 planar).
    pub output_width: u32,
    pub output_height: u32,
}

impl VideoConfig {
    pub fn for_preset(resolution: VideoResolution, output: (u32, u32)) -> Self {
        let (source_width, source_height) = resolution.dimensions();
        Self {
            source_width,
            source_height,
            output_width: output.0,
            output_height: output.1,
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────

/// A frame as produced by the decoder. The pipeline owns two of these and
/// lends them to the decoder to fill; plane storage is reused across calls.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    /// Y, U, V planes.
    pub planes: [Vec<u8>; 3],
    /// Bytes per row for each plane, as reported by the decoder.
    pub linesize: [usize; 3],
}

/// A scaled YUV 4:2:0 planar frame ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Increases by one for every published frame.
    pub sequence: u64,
    pub planes: [Vec<u8>; 3],
    pub linesize: [usize; 3],
}

impl VideoFrame {
    /// Allocate a zeroed YUV 4:2:0 frame with 32-byte aligned rows.
    pub fn new(width: u32, height: u32) -> Self {
        let align = |n: usize| n.div_ceil(LINE_ALIGN) * LINE_ALIGN;
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let linesize = [align(w), align(cw), align(cw)];
        Self {
            width,
            height,
            sequence: 0,
            planes: [
                vec![0; linesize[0] * h],
                vec![0; linesize[1] * ch],
                vec![0; linesize[2] * ch],
            ],
            linesize,
        }
    }

    /// Total bytes across all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

// ── External decoder / scaler ────────────────────────────────────

/// Result of submitting a compressed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// The decoder took the packet.
    Accepted,
    /// The decoder is full; drain a frame and resubmit the same packet.
    Saturated,
}

pub trait VideoDecoder: Send {
    /// Submit one access unit. An `Err` means the packet cannot be decoded.
    fn submit_packet(&mut self, packet: &[u8]) -> Result<Submit, RpsError>;

    /// Fill `frame` with the next decoded picture. `false` when none is ready.
    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> bool;
}

pub trait FrameScaler: Send {
    /// Convert `rows` rows of `src` (using its linesizes) into `dst`.
    fn scale(&mut self, src: &DecodedFrame, rows: u32, dst: &mut VideoFrame)
    -> Result<(), RpsError>;
}

/// Opens decoder and scaler instances for a [`VideoConfig`].
pub trait VideoBackend: Send + Sync {
    fn open_decoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoDecoder>, RpsError>;

    /// Open a linear-filtering scaler from source to output geometry.
    fn open_scaler(&self, config: &VideoConfig) -> Result<Box<dyn FrameScaler>, RpsError>;
}

// ── Stats ────────────────────────────────────────────────────────

/// Per-pipeline counters exposed to the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    pub packets: u64,
    pub frames_published: u64,
    /// Decoded frames thrown away by backpressure or by newest-wins draining.
    pub frames_discarded: u64,
    pub decode_errors: u64,
}

// ── FrameReceiver ────────────────────────────────────────────────

/// Presentation-side end of the frame mailbox.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Arc<VideoFrame>>>,
}

impl FrameReceiver {
    /// `true` if a frame was published since the last [`latest`](Self::latest).
    pub fn has_new(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// The most recent frame, marking it seen.
    pub fn latest(&mut self) -> Option<Arc<VideoFrame>> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next published frame. `None` once the pipeline is gone.
    pub async fn changed(&mut self) -> Option<Arc<VideoFrame>> {
        self.rx.changed().await.ok()?;
        self.latest()
    }
}

// ── VideoPipeline ────────────────────────────────────────────────

struct Ready {
    config: VideoConfig,
    decoder: Box<dyn VideoDecoder>,
    scaler: Box<dyn FrameScaler>,
    /// Newest drained frame.
    current: DecodedFrame,
    /// Scratch target for the next receive.
    next: DecodedFrame,
    /// Output buffer the next scale writes into.
    output: Option<VideoFrame>,
}

enum Phase {
    Uninitialized,
    Ready(Box<Ready>),
    Closed,
}

/// Decodes and scales packets for one session and publishes the newest
/// frame into a single-slot mailbox.
pub struct VideoPipeline {
    phase: Phase,
    frame_tx: watch::Sender<Option<Arc<VideoFrame>>>,
    sequence: u64,
    stats: VideoStats,
}

impl VideoPipeline {
    pub fn new() -> Self {
        let (frame_tx, _) = watch::channel(None);
        Self {
            phase: Phase::Uninitialized,
            frame_tx,
            sequence: 0,
            stats: VideoStats::default(),
        }
    }

    /// Open the decoder and scaler and allocate the output buffer.
    ///
    /// Valid from: `Uninitialized`.
    pub fn init(&mut self, backend: &dyn VideoBackend, config: VideoConfig) -> Result<(), RpsError> {
        if !matches!(self.phase, Phase::Uninitialized) {
            return Err(RpsError::InvalidState("video pipeline already initialised"));
        }

        let decoder = backend.open_decoder(&config)?;
        let scaler = backend.open_scaler(&config)?;
        let output = VideoFrame::new(config.output_width, config.output_height);

        tracing::info!(
            source = %format_args!("{}x{}", config.source_width, config.source_height),
            output = %format_args!("{}x{}", config.output_width, config.output_height),
            "video pipeline ready"
        );

        self.phase = Phase::Ready(Box::new(Ready {
            config,
            decoder,
            scaler,
            current: DecodedFrame::default(),
            next: DecodedFrame::default(),
            output: Some(output),
        }));
        Ok(())
    }

    /// Release decoder, scaler, and buffers. Idempotent.
    pub fn close(&mut self) {
        if matches!(self.phase, Phase::Ready(_)) {
            tracing::debug!(stats = ?self.stats, "video pipeline closed");
        }
        self.phase = Phase::Closed;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }

    pub fn config(&self) -> Option<VideoConfig> {
        match &self.phase {
            Phase::Ready(ready) => Some(ready.config),
            _ => None,
        }
    }

    pub fn stats(&self) -> VideoStats {
        self.stats
    }

    /// A new reader for the frame mailbox.
    pub fn frames(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.frame_tx.subscribe(),
        }
    }

    /// Feed one compressed access unit.
    ///
    /// Returns `true` if a new frame was published. Decode failures drop
    /// this packet only; the pipeline stays usable.
    pub fn on_video_packet(&mut self, packet: &[u8]) -> bool {
        let Phase::Ready(ready) = &mut self.phase else {
            tracing::warn!("video packet received while pipeline is not ready");
            return false;
        };
        self.stats.packets += 1;

        let mut frame = match decode_and_scale(ready, packet, &mut self.stats) {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!(len = packet.len(), "dropping video packet: {e}");
                return false;
            }
        };

        self.sequence += 1;
        frame.sequence = self.sequence;
        let previous = self.frame_tx.send_replace(Some(Arc::new(frame)));
        // Reuse the previous buffer unless the reader still holds it.
        ready.output = previous.and_then(|arc| Arc::try_unwrap(arc).ok());
        self.stats.frames_published += 1;
        true
    }
}

impl Default for VideoPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSink for VideoPipeline {
    fn on_video_packet(&mut self, packet: &[u8]) -> bool {
        VideoPipeline::on_video_packet(self, packet)
    }
}

/// Submit with backpressure handling, drain newest-wins, and scale.
fn decode_and_scale(
    ready: &mut Ready,
    packet: &[u8],
    stats: &mut VideoStats,
) -> Result<Option<VideoFrame>, RpsError> {
    // Every retry consumes one decoded frame, so this ends as soon as the
    // decoder runs out of frames to give back.
    loop {
        match ready.decoder.submit_packet(packet)? {
            Submit::Accepted => break,
            Submit::Saturated => {
                if !ready.decoder.receive_frame(&mut ready.next) {
                    return Err(RpsError::Decode(
                        "decoder saturated with no frame to drain".into(),
                    ));
                }
                stats.frames_discarded += 1;
                tracing::trace!("decoder saturated, discarded one frame");
            }
        }
    }

    let mut drained = 0u64;
    while ready.decoder.receive_frame(&mut ready.next) {
        std::mem::swap(&mut ready.current, &mut ready.next);
        drained += 1;
    }
    if drained == 0 {
        return Ok(None);
    }
    stats.frames_discarded += drained - 1;

    let mut output = ready.output.take().unwrap_or_else(|| {
        VideoFrame::new(ready.config.output_width, ready.config.output_height)
    });
    let rows = ready.current.height;
    if let Err(e) = ready.scaler.scale(&ready.current, rows, &mut output) {
        ready.output = Some(output);
        return Err(e);
    }
    Ok(Some(output))
}

// ── Tests ────────────────────────────────────────────────────────
