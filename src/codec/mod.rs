//! PCM wire codec
//!
//! Stateless conversion between floating-point samples and the
//! transport's base64-wrapped 16-bit little-endian representation.

pub mod decoder;
pub mod encoder;

pub use decoder::decode;
pub use encoder::encode;

/// Transport-safe encoding of one captured audio frame.
///
/// The payload is base64 text over packed 16-bit little-endian PCM,
/// tagged with a MIME-style format string. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    /// Base64 payload
    pub data: String,
    /// Format tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Decoded audio ready for scheduling, one sample buffer per channel.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// De-interleaved samples, `channels[ch][frame]`
    pub channels: Vec<Vec<f32>>,
    /// Sample rate the buffer was decoded at
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Number of sample frames per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    /// Channel count
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Buffer duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}
