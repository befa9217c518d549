//! Error types for the voice-guide session

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Microphone denied or missing. Aborts connection setup.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    /// The device rejected the fixed mono stream shape.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// PCM codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload byte length is not a whole number of 16-bit sample frames.
    #[error("Malformed payload: {len} bytes cannot hold {channels}-channel 16-bit frames")]
    MalformedPayload { len: usize, channels: u16 },

    #[error("Invalid text encoding: {0}")]
    InvalidEncoding(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote session failed to establish. Aborts connection setup.
    #[error("Failed to open session: {0}")]
    OpenFailed(String),

    /// Error during an active session. Tears the session down.
    #[error("Session error: {0}")]
    Runtime(String),

    /// Remote end closed the session. Treated like a runtime error.
    #[error("Session closed by peer")]
    ClosedByPeer,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
