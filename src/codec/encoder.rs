//! PCM wire encoder
//!
//! Packs float samples into the base64 PCM format the live transport
//! expects for microphone audio.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::codec::WireChunk;
use crate::constants::PCM_MIME_16K;

/// Encode float samples in [-1, 1] into a transport chunk.
///
/// Samples are clamped before scaling, multiplied by 32767, truncated
/// to i16 and packed little-endian. Out-of-range input is absorbed by
/// the clamp, so this never fails.
pub fn encode(samples: &[f32]) -> WireChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    WireChunk {
        data: STANDARD.encode(&bytes),
        mime_type: PCM_MIME_16K.to_string(),
    }
}
