//! PCM16 and base64 codecs
//!
//! Both directions use the same scale factor (32768) so a capture-encoded
//! buffer decodes back within one quantization step.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

const SCALE: f32 = 32768.0;

/// Encode float samples as PCM16 little-endian bytes
///
/// Samples are clamped to [-1, 1]; +1.0 saturates at `i16::MAX`.
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&to_i16(sample).to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into float samples in [-1, 1)
///
/// # Errors
///
/// Returns error if the buffer holds a partial sample
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Audio(format!(
            "PCM16 buffer has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / SCALE)
        .collect())
}

/// Convert one float sample to i16
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * SCALE).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Base64-encode bytes for the wire
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 from the wire
///
/// # Errors
///
/// Returns error if the input is not valid base64
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::Audio(format!("invalid base64 audio: {e}")))
}
