//! Voice audio module
//!
//! Handles microphone capture into fixed PCM frames and queued playback of
//! PCM chunks received from the remote service. Neither side knows about the
//! network; the session controller wires them to the transport.
//!
//! Wire contract: capture is PCM16 LE mono at 16 kHz, playback is PCM16 LE
//! mono at 24 kHz.

mod capture;
mod context;
mod framer;
pub mod pcm;
mod playback;
mod resample;

pub use capture::{AudioCapture, CaptureUnit, FrameDispatcher, FrameSender};
pub use context::{AudioContext, DeviceList};
pub use framer::{Framer, downmix};
pub use playback::{AudioPlayback, AudioSink, CpalSink, PlaybackEvent, PlaybackUnit};
pub use resample::{StreamResampler, resample_block};

use std::time::Duration;

use crate::Result;

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio returned by the remote service
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// MIME descriptor attached to outbound audio
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";

/// A fixed-length block of mono samples produced by capture
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// Create a frame from float samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Float samples in [-1, 1]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate of the frame
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Position of this frame within its capture run
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encode as PCM16 little-endian bytes
    #[must_use]
    pub fn to_pcm16(&self) -> Vec<u8> {
        pcm::encode_pcm16(&self.samples)
    }

    /// Playback duration of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

/// A variable-length PCM16 buffer received from the remote service
///
/// Chunks are not frame-aligned and are decoded independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackChunk {
    data: Vec<u8>,
    sample_rate: u32,
}

impl PlaybackChunk {
    /// Wrap raw PCM16 LE bytes
    #[must_use]
    pub const fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    /// Wrap raw PCM16 LE bytes at the default playback rate
    #[must_use]
    pub const fn pcm24k(data: Vec<u8>) -> Self {
        Self::new(data, PLAYBACK_SAMPLE_RATE)
    }

    /// Raw bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sample rate of the chunk
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode to float samples
    ///
    /// # Errors
    ///
    /// Returns error if the byte length is not a whole number of samples
    pub fn decode(&self) -> Result<Vec<f32>> {
        pcm::decode_pcm16(&self.data)
    }

    /// Playback duration of the chunk
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.data.len() / 2, self.sample_rate)
    }
}

#[allow(clippy::cast_precision_loss)]
fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / f64::from(sample_rate))
}
