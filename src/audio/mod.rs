//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod playback;
pub mod timeline;

pub use capture::{CapturePipeline, InputSource, MicSource};
pub use playback::{ManualClock, PlaybackClock, PlaybackScheduler, SampleClock};
pub use timeline::{PlaybackSource, Timeline};
