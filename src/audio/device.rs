//! Audio device acquisition
//!
//! Thin cpal helpers for the two fixed stream shapes this client uses:
//! 16 kHz mono capture and 24 kHz mono playback.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use crate::constants::{CAPTURE_CHANNELS, CAPTURE_SAMPLE_RATE, PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE};
use crate::error::AudioError;

/// Get the default input device, failing when none exists or access
/// is denied by the host.
pub fn default_input() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))
}

/// Get the default output device.
pub fn default_output() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))
}

/// Probe that a device can be opened for input at all.
pub fn probe_input(device: &cpal::Device) -> Result<(), AudioError> {
    device
        .default_input_config()
        .map(|_| ())
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

/// Classify a stream build failure.
pub fn build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable(err.to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            AudioError::UnsupportedFormat(err.to_string())
        }
        other => AudioError::StreamError(other.to_string()),
    }
}

/// Stream shape for microphone capture: 16 kHz mono.
pub fn capture_config() -> StreamConfig {
    StreamConfig {
        channels: CAPTURE_CHANNELS,
        sample_rate: SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    }
}

/// Stream shape for synthesized speech playback: 24 kHz mono.
pub fn playback_config() -> StreamConfig {
    StreamConfig {
        channels: PLAYBACK_CHANNELS,
        sample_rate: SampleRate(PLAYBACK_SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    }
}
