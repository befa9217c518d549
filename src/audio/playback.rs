//! Playback scheduler
//!
//! Plays inbound speech chunks back-to-back with no gaps. Decoded
//! buffers are scheduled on a [`Timeline`] guarded by a single mutex;
//! the output device thread mixes scheduled sources against a
//! sample-counter clock and retires them as they finish. When the last
//! source drains, a zero volume event tells the UI the model stopped
//! speaking.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device;
use crate::audio::timeline::Timeline;
use crate::codec;
use crate::constants::{PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE};
use crate::error::{AudioError, CodecError};
use crate::session::{EventSender, SessionEvent};

/// Source of "current playback time" in seconds
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock derived from the number of samples the output stream has
/// rendered. Advanced only by the output callback.
pub struct SampleClock {
    rendered: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            rendered: AtomicU64::new(0),
            sample_rate,
        }
    }

    pub fn advance(&self, samples: u64) {
        self.rendered.fetch_add(samples, Ordering::Relaxed);
    }
}

impl PlaybackClock for SampleClock {
    fn now(&self) -> f64 {
        self.rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

/// Hand-driven clock for deterministic scheduling tests
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            micros: AtomicU64::new(0),
        }
    }

    pub fn set_secs(&self, secs: f64) {
        self.micros.store((secs * 1e6) as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }
}

struct OutputHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Schedules decoded speech chunks onto the output device
pub struct PlaybackScheduler {
    timeline: Arc<Mutex<Timeline>>,
    clock: Arc<dyn PlaybackClock>,
    events: EventSender,
    output: Mutex<Option<OutputHandle>>,
}

impl PlaybackScheduler {
    /// Open the default output device and start the mixing stream.
    pub fn open(events: EventSender) -> Result<Self, AudioError> {
        let clock = Arc::new(SampleClock::new(PLAYBACK_SAMPLE_RATE));
        let timeline = Arc::new(Mutex::new(Timeline::new()));
        let output = Self::start_output(timeline.clone(), clock.clone(), events.clone())?;

        Ok(Self {
            timeline,
            clock,
            events,
            output: Mutex::new(Some(output)),
        })
    }

    /// Scheduler without an output device, driven by an external clock.
    /// The timeline semantics are identical; nothing is rendered.
    pub fn detached(clock: Arc<dyn PlaybackClock>, events: EventSender) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::new())),
            clock,
            events,
            output: Mutex::new(None),
        }
    }

    fn start_output(
        timeline: Arc<Mutex<Timeline>>,
        clock: Arc<SampleClock>,
        events: EventSender,
    ) -> Result<OutputHandle, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let running_for_callback = running.clone();

        let handle = thread::Builder::new()
            .name("playback-out".to_string())
            .spawn(move || {
                let device = match device::default_output() {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let channels = PLAYBACK_CHANNELS as usize;
                let mut mono = Vec::new();
                let stream = device.build_output_stream(
                    &device::playback_config(),
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = out.len() / channels;
                        mono.resize(frames, 0.0);

                        if !running_for_callback.load(Ordering::Relaxed) {
                            out.fill(0.0);
                            return;
                        }

                        let now = clock.now();
                        let drained = timeline.lock().render(now, &mut mono, PLAYBACK_SAMPLE_RATE);
                        clock.advance(frames as u64);

                        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                            frame.fill(mono[i]);
                        }

                        if drained {
                            let _ = events.send(SessionEvent::Volume(0.0));
                        }
                    },
                    |err| {
                        tracing::warn!("Output stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(device::build_error(e)));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(OutputHandle {
                running,
                thread_handle: Some(handle),
            }),
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "playback thread did not report readiness".to_string(),
                ))
            }
        }
    }

    /// Decode an inbound payload at 24 kHz mono and schedule it after
    /// whatever is already queued.
    ///
    /// A malformed payload is reported to the caller and nothing is
    /// scheduled; the session is expected to drop the chunk and carry on.
    pub fn enqueue(&self, payload: &str) -> Result<(), CodecError> {
        let mut decoded = codec::decode(payload, PLAYBACK_SAMPLE_RATE, PLAYBACK_CHANNELS)?;
        let samples = decoded.channels.swap_remove(0);
        let sample_rate = decoded.sample_rate;

        let now = self.clock.now();
        let (id, start) = self.timeline.lock().enqueue(now, samples, sample_rate);
        tracing::trace!("Scheduled source {} at t={:.3}", id, start);
        Ok(())
    }

    /// Stop every scheduled source and rewind the cursor. Idempotent.
    pub fn interrupt(&self) {
        let stopped = self.timeline.lock().interrupt();
        if stopped > 0 {
            // Mirrors natural drain: no sources left means silence
            let _ = self.events.send(SessionEvent::Volume(0.0));
        }
    }

    /// Interrupt plus release of the output device.
    pub fn reset(&self) {
        self.interrupt();
        if let Some(mut output) = self.output.lock().take() {
            output.running.store(false, Ordering::SeqCst);
            if let Some(handle) = output.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Number of scheduled or playing sources
    pub fn active_sources(&self) -> usize {
        self.timeline.lock().active_sources()
    }

    /// Time the next enqueued chunk would begin
    pub fn cursor(&self) -> f64 {
        self.timeline.lock().cursor()
    }

    /// Scheduled `(start, end)` windows, in enqueue order
    pub fn source_windows(&self) -> Vec<(f64, f64)> {
        self.timeline.lock().source_windows()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crossbeam_channel::unbounded;

    fn detached_scheduler() -> (PlaybackScheduler, Arc<ManualClock>, crossbeam_channel::Receiver<SessionEvent>) {
        let clock = Arc::new(ManualClock::new());
        let (tx, rx) = unbounded();
        let scheduler = PlaybackScheduler::detached(clock.clone(), tx);
        (scheduler, clock, rx)
    }

    fn payload(samples: usize) -> String {
        encode(&vec![0.1f32; samples]).data
    }

    #[test]
    fn test_enqueue_schedules_one_source_with_expected_duration() {
        let (scheduler, clock, _rx) = detached_scheduler();
        clock.set_secs(1.0);

        scheduler.enqueue(&payload(2400)).unwrap();

        assert_eq!(scheduler.active_sources(), 1);
        let (start, end) = scheduler.source_windows()[0];
        assert!(start >= 1.0);
        assert!((end - start - 0.1).abs() < 1e-6);
        assert!((scheduler.cursor() - end).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_payload_schedules_nothing() {
        let (scheduler, _clock, _rx) = detached_scheduler();

        // "AAAA" is three raw bytes: not a whole number of 16-bit samples
        let err = scheduler.enqueue("AAAA").unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload { len: 3, channels: 1 }));
        assert_eq!(scheduler.active_sources(), 0);
    }

    #[test]
    fn test_interrupt_emits_silence_level_once() {
        let (scheduler, _clock, rx) = detached_scheduler();
        scheduler.enqueue(&payload(2400)).unwrap();
        scheduler.enqueue(&payload(2400)).unwrap();

        scheduler.interrupt();
        assert_eq!(scheduler.active_sources(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Volume(v)) if v == 0.0));

        // Interrupting an empty set stays silent
        scheduler.interrupt();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_enqueue_after_interrupt_reanchors_to_clock() {
        let (scheduler, clock, _rx) = detached_scheduler();
        scheduler.enqueue(&payload(24000)).unwrap();
        scheduler.interrupt();

        clock.set_secs(2.0);
        scheduler.enqueue(&payload(2400)).unwrap();
        let (start, _) = scheduler.source_windows()[0];
        assert!((start - 2.01).abs() < 1e-6);
    }

    #[test]
    fn test_reset_without_output_device_is_safe() {
        let (scheduler, _clock, _rx) = detached_scheduler();
        scheduler.enqueue(&payload(2400)).unwrap();
        scheduler.reset();
        assert_eq!(scheduler.active_sources(), 0);
        scheduler.reset();
    }
}
