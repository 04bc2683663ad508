//! Sample rate conversion for devices that cannot run at the wire rate

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input block size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks per block
const SUB_CHUNKS: usize = 2;

/// Streaming mono resampler
///
/// Buffers input until a full block is available, so it can be fed directly
/// from device callbacks of any size. Passthrough when rates match.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler converting `from` Hz to `to` Hz
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be constructed for these rates
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            Some(new_fft(from, to)?)
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Whether samples pass through unchanged
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed samples, appending any converted output to `out`
    ///
    /// A failed block is dropped with a warning rather than interrupting the stream.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return;
        };

        self.pending.extend_from_slice(input);

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            match resampler.process(&[&self.pending[..needed]], None) {
                Ok(result) => out.extend_from_slice(&result[0]),
                Err(e) => tracing::warn!(error = %e, "resample failed, dropping block"),
            }
            self.pending.drain(..needed);
        }
    }

    /// Drop buffered input
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("passthrough", &self.is_passthrough())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Resample a complete mono buffer
///
/// Output length is `samples.len() * to / from`, with the resampler delay removed.
///
/// # Errors
///
/// Returns error if resampling fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample_block(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_fft(from, to)?;
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;

    // Two trailing blocks of silence flush the delay line
    let chunk = resampler.input_frames_next();
    let mut padded = samples.to_vec();
    padded.resize(samples.len().div_ceil(chunk) * chunk + 2 * chunk, 0.0);

    let mut out = Vec::with_capacity(expected + delay);
    for block in padded.chunks(chunk) {
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        out.extend_from_slice(&result[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

fn new_fft(from: u32, to: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}
