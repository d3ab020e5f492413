//! Audio pipeline: lazy device bring-up and PCM forwarding.
//!
//! The engine announces the stream format once (and again if it changes),
//! then delivers interleaved signed 16-bit PCM. Audio failures never tear
//! the session down; the pipeline just goes quiet.

use std::sync::Arc;

use crate::engine::AudioSink;
use crate::error::RpsError;

/// Frames requested per device buffer.
pub const DEVICE_BUFFER_FRAMES: u32 = 1024;

/// Output format: S16 native-endian, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
    /// Frames per device buffer.
    pub samples: u32,
}

impl AudioFormat {
    pub fn new(channels: u32, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            samples: DEVICE_BUFFER_FRAMES,
        }
    }
}

/// An open output device.
pub trait AudioDevice: Send {
    /// Queue interleaved samples for playback.
    fn enqueue(&mut self, samples: &[i16]) -> Result<(), RpsError>;
}

/// Opens output devices.
pub trait AudioBackend: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioDevice>, RpsError>;
}

/// Forwards engine PCM to a lazily opened device.
pub struct AudioPipeline {
    backend: Arc<dyn AudioBackend>,
    device: Option<Box<dyn AudioDevice>>,
    format: Option<AudioFormat>,
}

impl AudioPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            device: None,
            format: None,
        }
    }

    /// The last announced format, if any.
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// `true` while a device is open.
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Open (or reopen) the device for a new format.
    pub fn on_format(&mut self, channels: u32, sample_rate: u32) {
        let format = AudioFormat::new(channels, sample_rate);
        // Close the old device before asking for a new one.
        self.device = None;
        self.format = Some(format);

        match self.backend.open(format) {
            Ok(device) => {
                tracing::info!(channels, sample_rate, "audio device opened");
                self.device = Some(device);
            }
            Err(e) => {
                tracing::error!(channels, sample_rate, kind = ?e.kind(), "audio disabled: {e}");
            }
        }
    }

    /// Queue `frames` frames of interleaved PCM from `pcm`.
    pub fn on_samples(&mut self, pcm: &[i16], frames: usize) {
        let (Some(device), Some(format)) = (self.device.as_mut(), self.format) else {
            return;
        };
        let wanted = frames.saturating_mul(format.channels as usize);
        let count = wanted.min(pcm.len());
        if count < wanted {
            tracing::trace!(wanted, available = pcm.len(), "short audio buffer");
        }
        if let Err(e) = device.enqueue(&pcm[..count]) {
            tracing::warn!(kind = ?e.kind(), "audio buffer dropped: {e}");
        }
    }
}

impl AudioSink for AudioPipeline {
    fn on_format(&mut self, channels: u32, sample_rate: u32) {
        AudioPipeline::on_format(self, channels, sample_rate);
    }

    fn on_samples(&mut self, pcm: &[i16], frames: usize) {
        AudioPipeline::on_samples(self, pcm, frames);
    }
}

// ── Tests ────────────────────────────────────────────────────────
