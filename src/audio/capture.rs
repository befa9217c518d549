//! Microphone capture pipeline
//!
//! Slices the continuous input stream into fixed 4096-sample frames,
//! meters loudness per frame and hands each frame to the codec before
//! emitting it on the session's outbound sink. The cpal stream lives
//! on a dedicated thread with an atomic running flag, so `stop()` can
//! join it and release the device from any context.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::device;
use crate::codec;
use crate::constants::{CAPTURE_FRAME_SAMPLES, MIC_LEVEL_GAIN};
use crate::error::AudioError;
use crate::session::{EventSender, SessionEvent};
use crate::transport::ClientMessage;

/// Callback receiving raw float samples from an input source
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Seam over the microphone device.
///
/// `MicSource` is the cpal-backed implementation; tests inject sources
/// that feed samples by hand.
pub trait InputSource: Send {
    /// Verify the device exists and can be opened. Called during
    /// connection setup so a missing microphone aborts the connect.
    fn acquire(&mut self) -> Result<(), AudioError>;

    /// Begin delivering samples to `sink` from the audio thread.
    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError>;

    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Accumulates arbitrarily sized input callbacks into fixed frames,
/// preserving capture order.
pub struct FrameSlicer {
    buf: Vec<f32>,
    frame_len: usize,
}

impl FrameSlicer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(frame_len * 2),
            frame_len,
        }
    }

    pub fn extend(&mut self, samples: &[f32]) {
        self.buf.extend_from_slice(samples);
    }

    /// Take the next complete frame, if one has accumulated.
    pub fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.buf.len() < self.frame_len {
            return None;
        }
        Some(self.buf.drain(..self.frame_len).collect())
    }
}

/// Root-mean-square loudness of a sample window
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Default microphone input backed by cpal
pub struct MicSource {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MicSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl Default for MicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for MicSource {
    fn acquire(&mut self) -> Result<(), AudioError> {
        let device = device::default_input()?;
        device::probe_input(&device)
    }

    fn start(&mut self, mut sink: SampleSink) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // The cpal stream is not Send, so it is built and owned by the
        // capture thread; build errors come back over the ready channel.
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let running_for_loop = self.running.clone();

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let device = match device::default_input() {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = device.build_input_stream(
                    &device::capture_config(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if running.load(Ordering::Relaxed) {
                            sink(data);
                        }
                    },
                    |err| {
                        tracing::warn!("Input stream error: {}", err);
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
                        // Stream drops here, releasing the device
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(device::build_error(e)));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError(
                    "capture thread did not report readiness".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frames, meters and encodes microphone audio for one session
pub struct CapturePipeline {
    source: Box<dyn InputSource>,
    streaming: bool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn InputSource>) -> Self {
        Self {
            source,
            streaming: false,
        }
    }

    /// Verify the microphone can be opened, without streaming yet.
    pub fn acquire(&mut self) -> Result<(), AudioError> {
        self.source.acquire()
    }

    /// Start streaming encoded frames to `outbound` and per-frame
    /// loudness to `events`. Frames are emitted in capture order.
    pub fn start(
        &mut self,
        outbound: UnboundedSender<ClientMessage>,
        events: EventSender,
    ) -> Result<(), AudioError> {
        if self.streaming {
            return Ok(());
        }

        let mut slicer = FrameSlicer::new(CAPTURE_FRAME_SAMPLES);
        self.source.start(Box::new(move |samples| {
            slicer.extend(samples);
            while let Some(frame) = slicer.next_frame() {
                let level = rms(&frame) * MIC_LEVEL_GAIN;
                let _ = events.send(SessionEvent::Volume(level));

                let chunk = codec::encode(&frame);
                if outbound.send(ClientMessage::Audio(chunk)).is_err() {
                    // Transport is gone; the session is tearing down
                    break;
                }
            }
        }))?;

        self.streaming = true;
        Ok(())
    }

    /// Release the microphone. A stopped pipeline stays stopped; calling
    /// this twice is a no-op.
    pub fn stop(&mut self) {
        self.source.stop();
        self.streaming = false;
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
