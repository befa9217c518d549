//! PCM wire decoder
//!
//! Unpacks base64 PCM payloads from the live transport into
//! de-interleaved float buffers ready for playback scheduling.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::codec::DecodedAudio;
use crate::error::CodecError;

/// Decode a base64 PCM payload into per-channel float buffers.
///
/// Bytes are reinterpreted as 16-bit little-endian samples,
/// de-interleaved by channel and rescaled by 1/32768. The divisor is
/// intentionally one larger than the encoder's 32767 multiplier.
pub fn decode(payload: &str, sample_rate: u32, channels: u16) -> Result<DecodedAudio, CodecError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidEncoding(e.to_string()))?;

    let frame_bytes = 2 * channels as usize;
    if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedPayload {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames); channels as usize];
    for frame in 0..frames {
        for ch in 0..channels as usize {
            let i = (frame * channels as usize + ch) * 2;
            let value = i16::from_le_bytes([bytes[i], bytes[i + 1]]);
            out[ch].push(value as f32 / 32768.0);
        }
    }

    Ok(DecodedAudio {
        channels: out,
        sample_rate,
    })
}
