//! # Museum Live Guide
//!
//! Realtime bidirectional voice session between a microphone-equipped
//! museum client and a remote conversational speech model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         CLIENT                                    │
//! │                                                                   │
//! │  ┌────────────┐  4096-sample   ┌───────────┐   base64 PCM        │
//! │  │ Microphone │───frames──────▶│ PCM Codec │───16 kHz mono──┐    │
//! │  └────────────┘  (capture)     └───────────┘                │    │
//! │        │ RMS x 5                                            ▼    │
//! │        ▼                                          ┌──────────────┐│
//! │  ┌────────────┐   SessionEvent::Volume            │  Transport   ││
//! │  │ Visualizer │◀──────────────────────────────────│  (WebSocket) ││
//! │  └────────────┘                                   └──────┬───────┘│
//! │        ▲ 0.4 while model speaks / 0 on drain             │        │
//! │        │                                                 ▼        │
//! │  ┌─────┴──────────────┐  enqueue   ┌───────────┐  serverContent   │
//! │  │ Playback Scheduler │◀───decode──│ PCM Codec │◀──24 kHz mono────│
//! │  │ (gapless timeline) │            └───────────┘  + interrupted   │
//! │  └────────────────────┘                                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session controller in [`session`] owns the lifecycle
//! (`Idle → Connecting → Active → Closing`) and is the only component
//! that touches all three of capture, playback and transport.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate the model expects for microphone audio
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Microphone channel count
    pub const CAPTURE_CHANNELS: u16 = 1;

    /// Fixed capture frame size in samples
    pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

    /// Sample rate of synthesized speech from the model
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Playback channel count
    pub const PLAYBACK_CHANNELS: u16 = 1;

    /// Forward offset applied when scheduling a chunk, so a chunk that
    /// arrives slightly behind the clock never starts in the past
    pub const SCHEDULE_AHEAD_SECS: f64 = 0.01;

    /// Display gain mapping typical speech RMS near the top of the
    /// visualizer's usable range
    pub const MIC_LEVEL_GAIN: f32 = 5.0;

    /// Constant visualizer level reported while the model is speaking;
    /// the downlink carries no per-sample loudness signal
    pub const PLAYBACK_PROXY_LEVEL: f32 = 0.4;

    /// Format tag for outbound microphone chunks
    pub const PCM_MIME_16K: &str = "audio/pcm;rate=16000";
}
