//! Fixed-size frame assembly

use super::AudioFrame;

/// Accumulates arbitrarily sized sample slices into fixed-length frames
///
/// The frame length is fixed for the lifetime of the framer. A trailing
/// partial frame is never emitted.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    sample_rate: u32,
    buffer: Vec<f32>,
    next_sequence: u64,
}

impl Framer {
    /// Create a framer producing frames of `frame_len` samples
    #[must_use]
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            sample_rate,
            buffer: Vec::with_capacity(frame_len),
            next_sequence: 0,
        }
    }

    /// Feed samples, invoking `emit` once per completed frame
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let room = self.frame_len - self.buffer.len();
            let take = room.min(samples.len());
            self.buffer.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buffer.len() == self.frame_len {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_len));
                emit(AudioFrame::new(full, self.sample_rate, self.next_sequence));
                self.next_sequence += 1;
            }
        }
    }

    /// Samples waiting for the current frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Frame length in samples
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Drop the partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
