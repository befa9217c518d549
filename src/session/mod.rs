//! Session controller
//!
//! Owns the lifecycle of one voice-guide session: acquires the
//! microphone, opens the transport, wires capture output to the
//! outbound sink, routes inbound speech to the playback scheduler and
//! tears everything down through a single disconnect path. The
//! surrounding UI observes the session only through [`SessionEvent`]s
//! on the channel returned at construction.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::capture::{CapturePipeline, InputSource, MicSource};
use crate::audio::playback::PlaybackScheduler;
use crate::constants::PLAYBACK_PROXY_LEVEL;
use crate::error::{AudioError, Result, TransportError};
use crate::transport::{ClientMessage, ServerEvent, SessionSetup, Transport};

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
}

/// Notification to the surrounding UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport opened and capture is streaming
    Connected,
    /// The session ended, whether by request or by failure
    Disconnected,
    /// Current level for the visualizer, zero or more times while active
    Volume(f32),
}

/// Sending half of the session's event channel
pub type EventSender = crossbeam_channel::Sender<SessionEvent>;

/// Audio endpoints for one session
pub struct AudioDevices {
    pub input: Box<dyn InputSource>,
    pub scheduler: Arc<PlaybackScheduler>,
}

/// Builds the audio endpoints during `connect()`. The default factory
/// opens the system microphone and speaker; tests inject doubles.
pub type AudioFactory = Box<dyn Fn(EventSender) -> std::result::Result<AudioDevices, AudioError> + Send + Sync>;

/// Orchestrates capture, playback and transport for one session at a time
pub struct SessionController {
    setup: SessionSetup,
    transport: Arc<dyn Transport>,
    audio: AudioFactory,
    state: Mutex<SessionState>,
    /// Set when a connect attempt begins; cleared by the disconnect that
    /// reports it. Guarantees exactly one Disconnected per connect.
    was_active: AtomicBool,
    events: EventSender,
    capture: Mutex<Option<CapturePipeline>>,
    scheduler: Mutex<Option<Arc<PlaybackScheduler>>>,
    outbound: Mutex<Option<UnboundedSender<ClientMessage>>>,
}

impl SessionController {
    /// Controller backed by the system microphone and speaker.
    pub fn new(
        setup: SessionSetup,
        transport: Arc<dyn Transport>,
    ) -> (Arc<Self>, crossbeam_channel::Receiver<SessionEvent>) {
        let factory: AudioFactory = Box::new(|events| {
            Ok(AudioDevices {
                input: Box::new(MicSource::new()),
                scheduler: Arc::new(PlaybackScheduler::open(events)?),
            })
        });
        Self::with_audio(setup, transport, factory)
    }

    /// Controller with injected audio endpoints.
    pub fn with_audio(
        setup: SessionSetup,
        transport: Arc<dyn Transport>,
        audio: AudioFactory,
    ) -> (Arc<Self>, crossbeam_channel::Receiver<SessionEvent>) {
        let (events, events_rx) = crossbeam_channel::unbounded();
        let controller = Arc::new(Self {
            setup,
            transport,
            audio,
            state: Mutex::new(SessionState::Idle),
            was_active: AtomicBool::new(false),
            events,
            capture: Mutex::new(None),
            scheduler: Mutex::new(None),
            outbound: Mutex::new(None),
        });
        (controller, events_rx)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[cfg(test)]
    fn holds_audio(&self) -> bool {
        self.capture.lock().is_some() || self.scheduler.lock().is_some()
    }

    /// Establish the session: microphone, playback, then transport.
    ///
    /// No-op unless Idle, so a second call while connecting or active
    /// re-acquires nothing and opens no duplicate transport. Every
    /// failure path converges on [`disconnect`](Self::disconnect), which
    /// surfaces as a single Disconnected event.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                return Ok(());
            }
            *state = SessionState::Connecting;
        }
        self.was_active.store(true, Ordering::SeqCst);

        let devices = match (self.audio)(self.events.clone()) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!("Audio setup failed: {}", e);
                self.disconnect();
                return Err(e.into());
            }
        };

        let mut capture = CapturePipeline::new(devices.input);
        if let Err(e) = capture.acquire() {
            tracing::error!("Microphone acquisition failed: {}", e);
            devices.scheduler.reset();
            self.disconnect();
            return Err(e.into());
        }
        let scheduler = devices.scheduler;
        {
            let state = self.state.lock();
            // disconnect() may have raced in; the fresh devices must not
            // outlive it in the slots
            if *state != SessionState::Connecting {
                capture.stop();
                scheduler.reset();
                return Ok(());
            }
            *self.capture.lock() = Some(capture);
            *self.scheduler.lock() = Some(scheduler.clone());
        }

        let connection = match self.transport.open(self.setup.clone()).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to open live session: {}", e);
                self.disconnect();
                return Err(e.into());
            }
        };
        {
            let mut state = self.state.lock();
            // disconnect() may have raced in from another context
            if *state != SessionState::Connecting {
                return Ok(());
            }
            *state = SessionState::Active;
        }
        *self.outbound.lock() = Some(connection.outbound.clone());

        let started = match self.capture.lock().as_mut() {
            Some(capture) => capture.start(connection.outbound, self.events.clone()),
            None => Ok(()),
        };
        if let Err(e) = started {
            tracing::error!("Capture failed to start: {}", e);
            self.disconnect();
            return Err(e.into());
        }

        let _ = self.events.send(SessionEvent::Connected);
        tracing::info!("Session active");

        let controller = Arc::clone(self);
        let mut inbound = connection.inbound;
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    ServerEvent::Audio { data } => controller.handle_audio(&scheduler, &data),
                    ServerEvent::Interrupted => {
                        if controller.state() == SessionState::Active {
                            tracing::debug!("Model speech interrupted");
                            scheduler.interrupt();
                        }
                    }
                    ServerEvent::TurnComplete => {}
                    ServerEvent::Error(err) => {
                        match err {
                            TransportError::ClosedByPeer => tracing::info!("{}", err),
                            _ => tracing::warn!("Transport error: {}", err),
                        }
                        controller.disconnect();
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    fn handle_audio(&self, scheduler: &PlaybackScheduler, data: &str) {
        if self.state() != SessionState::Active {
            return;
        }
        // The downlink carries no usable loudness signal; a constant
        // proxy keeps the visualizer moving while the model speaks.
        let _ = self.events.send(SessionEvent::Volume(PLAYBACK_PROXY_LEVEL));
        if let Err(e) = scheduler.enqueue(data) {
            tracing::warn!("Dropping undecodable audio chunk: {}", e);
        }
    }

    /// Tear the session down. Idempotent from any state; fires
    /// Disconnected exactly once per connect, and nothing at all when
    /// the session was never connecting.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Idle && !self.was_active.load(Ordering::SeqCst) {
                return;
            }
            *state = SessionState::Closing;
        }

        if let Some(mut capture) = self.capture.lock().take() {
            capture.stop();
        }
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.reset();
        }
        if let Some(outbound) = self.outbound.lock().take() {
            let _ = outbound.send(ClientMessage::Close);
        }

        *self.state.lock() = SessionState::Idle;
        if self.was_active.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::Disconnected);
            tracing::info!("Session closed");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::SampleSink;
    use crate::audio::playback::ManualClock;
    use crate::codec::encode;
    use crate::error::TransportError;
    use crate::transport::TransportConnection;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// In-memory transport: the test injects server events and observes
    /// client messages.
    struct MockTransport {
        open_calls: AtomicUsize,
        fail_open: bool,
        server_tx: Mutex<Option<UnboundedSender<ServerEvent>>>,
        client_rx: Mutex<Option<UnboundedReceiver<ClientMessage>>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open_calls: AtomicUsize::new(0),
                fail_open: false,
                server_tx: Mutex::new(None),
                client_rx: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                open_calls: AtomicUsize::new(0),
                fail_open: true,
                server_tx: Mutex::new(None),
                client_rx: Mutex::new(None),
            })
        }

        fn send_server(&self, event: ServerEvent) {
            if let Some(tx) = self.server_tx.lock().as_ref() {
                let _ = tx.send(event);
            }
        }

        fn take_client_rx(&self) -> UnboundedReceiver<ClientMessage> {
            self.client_rx.lock().take().expect("transport not opened")
        }
    }

    impl Transport for MockTransport {
        fn open(
            &self,
            _setup: SessionSetup,
        ) -> BoxFuture<'static, std::result::Result<TransportConnection, TransportError>> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Box::pin(async {
                    Err(TransportError::OpenFailed("refused".to_string()))
                });
            }
            let (out_tx, out_rx) = unbounded_channel();
            let (ev_tx, ev_rx) = unbounded_channel();
            *self.server_tx.lock() = Some(ev_tx);
            *self.client_rx.lock() = Some(out_rx);
            Box::pin(async {
                Ok(TransportConnection {
                    outbound: out_tx,
                    inbound: ev_rx,
                })
            })
        }
    }

    /// Input source the test drives by hand
    struct TestMic {
        sink: Arc<Mutex<Option<SampleSink>>>,
        unavailable: bool,
    }

    #[derive(Clone)]
    struct TestMicHandle(Arc<Mutex<Option<SampleSink>>>);

    impl TestMicHandle {
        fn feed(&self, samples: &[f32]) {
            if let Some(sink) = self.0.lock().as_mut() {
                sink(samples);
            }
        }

        fn is_streaming(&self) -> bool {
            self.0.lock().is_some()
        }
    }

    impl TestMic {
        fn available() -> (Self, TestMicHandle) {
            let sink = Arc::new(Mutex::new(None));
            (
                Self {
                    sink: sink.clone(),
                    unavailable: false,
                },
                TestMicHandle(sink),
            )
        }

        fn unavailable() -> Self {
            Self {
                sink: Arc::new(Mutex::new(None)),
                unavailable: true,
            }
        }
    }

    impl InputSource for TestMic {
        fn acquire(&mut self) -> std::result::Result<(), AudioError> {
            if self.unavailable {
                Err(AudioError::DeviceUnavailable("denied".to_string()))
            } else {
                Ok(())
            }
        }

        fn start(&mut self, sink: SampleSink) -> std::result::Result<(), AudioError> {
            *self.sink.lock() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            *self.sink.lock() = None;
        }
    }

    struct Harness {
        controller: Arc<SessionController>,
        events: crossbeam_channel::Receiver<SessionEvent>,
        transport: Arc<MockTransport>,
        mic: TestMicHandle,
        clock: Arc<ManualClock>,
        scheduler_slot: Arc<Mutex<Option<Arc<PlaybackScheduler>>>>,
    }

    impl Harness {
        /// Scheduler built by the factory during connect
        fn scheduler(&self) -> Arc<PlaybackScheduler> {
            self.scheduler_slot
                .lock()
                .clone()
                .expect("connect() was never called")
        }
    }

    fn harness_with(transport: Arc<MockTransport>, mic: TestMic, mic_handle: TestMicHandle) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let scheduler_slot: Arc<Mutex<Option<Arc<PlaybackScheduler>>>> =
            Arc::new(Mutex::new(None));

        let mic_slot = Mutex::new(Some(mic));
        let clock_for_factory = clock.clone();
        let slot_for_factory = scheduler_slot.clone();
        let factory: AudioFactory = Box::new(move |events| {
            let input = mic_slot
                .lock()
                .take()
                .ok_or_else(|| AudioError::DeviceUnavailable("already taken".to_string()))?;
            let scheduler = Arc::new(PlaybackScheduler::detached(
                clock_for_factory.clone(),
                events,
            ));
            *slot_for_factory.lock() = Some(scheduler.clone());
            Ok(AudioDevices {
                input: Box::new(input),
                scheduler,
            })
        });

        let setup = SessionSetup {
            model: "models/test".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "persona".to_string(),
        };
        let (controller, events) = SessionController::with_audio(setup, transport.clone(), factory);
        Harness {
            controller,
            events,
            transport,
            mic: mic_handle,
            clock,
            scheduler_slot,
        }
    }

    fn harness() -> Harness {
        let (mic, handle) = TestMic::available();
        harness_with(MockTransport::new(), mic, handle)
    }

    fn drain(events: &crossbeam_channel::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        events.try_iter().collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_connect_reaches_active_and_fires_connected_once() {
        let h = harness();
        h.controller.connect().await.unwrap();

        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.mic.is_streaming());
        let events = drain(&h.events);
        assert_eq!(
            events.iter().filter(|e| **e == SessionEvent::Connected).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_connect_while_active_is_a_no_op() {
        let h = harness();
        h.controller.connect().await.unwrap();
        h.controller.connect().await.unwrap();

        assert_eq!(h.transport.open_calls.load(Ordering::SeqCst), 1);
        let events = drain(&h.events);
        assert_eq!(
            events.iter().filter(|e| **e == SessionEvent::Connected).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_inbound_audio_schedules_playback_and_proxies_volume() {
        let h = harness();
        h.controller.connect().await.unwrap();
        let _ = drain(&h.events);

        h.clock.set_secs(1.0);
        let payload = encode(&vec![0.1f32; 2400]).data;
        h.transport.send_server(ServerEvent::Audio { data: payload });
        settle().await;

        assert_eq!(h.scheduler().active_sources(), 1);
        let (start, end) = h.scheduler().source_windows()[0];
        assert!(start >= 1.0);
        assert!((end - start - 2400.0 / 24000.0).abs() < 1e-6);

        let events = drain(&h.events);
        assert!(events.contains(&SessionEvent::Volume(0.4)));
    }

    #[tokio::test]
    async fn test_malformed_inbound_chunk_is_dropped_session_continues() {
        let h = harness();
        h.controller.connect().await.unwrap();

        h.transport.send_server(ServerEvent::Audio {
            data: "AAAA".to_string(), // three raw bytes, not whole samples
        });
        settle().await;

        assert_eq!(h.scheduler().active_sources(), 0);
        assert_eq!(h.controller.state(), SessionState::Active);

        // A valid chunk afterwards still plays
        let payload = encode(&vec![0.1f32; 2400]).data;
        h.transport.send_server(ServerEvent::Audio { data: payload });
        settle().await;
        assert_eq!(h.scheduler().active_sources(), 1);
    }

    #[tokio::test]
    async fn test_interruption_clears_active_sources() {
        let h = harness();
        h.controller.connect().await.unwrap();

        let payload = encode(&vec![0.1f32; 24000]).data;
        h.transport.send_server(ServerEvent::Audio { data: payload });
        settle().await;
        assert_eq!(h.scheduler().active_sources(), 1);

        h.transport.send_server(ServerEvent::Interrupted);
        settle().await;
        assert_eq!(h.scheduler().active_sources(), 0);
        assert_eq!(h.scheduler().cursor(), 0.0);
    }

    #[tokio::test]
    async fn test_captured_frames_flow_to_transport_in_order() {
        let h = harness();
        h.controller.connect().await.unwrap();
        let mut client_rx = h.transport.take_client_rx();
        let _ = drain(&h.events);

        // Two full frames plus a remainder
        h.mic.feed(&vec![0.5f32; 4096]);
        h.mic.feed(&vec![0.25f32; 4096]);
        h.mic.feed(&vec![0.1f32; 100]);

        let first = client_rx.try_recv().unwrap();
        let second = client_rx.try_recv().unwrap();
        assert!(client_rx.try_recv().is_err());

        let expected_first = encode(&vec![0.5f32; 4096]);
        match (first, second) {
            (ClientMessage::Audio(a), ClientMessage::Audio(b)) => {
                assert_eq!(a, expected_first);
                assert_eq!(b.mime_type, "audio/pcm;rate=16000");
            }
            other => panic!("unexpected messages: {:?}", other),
        }

        // RMS of a constant 0.5 frame, times the display gain
        let events = drain(&h.events);
        let volumes: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Volume(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 2);
        assert!((volumes[0] - 2.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_disconnect_fires_disconnected_exactly_once() {
        let h = harness();
        h.controller.connect().await.unwrap();
        let mut client_rx = h.transport.take_client_rx();
        let _ = drain(&h.events);

        h.controller.disconnect();
        h.controller.disconnect();

        assert_eq!(h.controller.state(), SessionState::Idle);
        let events = drain(&h.events);
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::Disconnected)
                .count(),
            1
        );
        assert!(matches!(client_rx.try_recv(), Ok(ClientMessage::Close)));
        assert!(!h.mic.is_streaming());
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_fires_nothing() {
        let h = harness();
        h.controller.disconnect();

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(drain(&h.events).is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_microphone_aborts_connect() {
        let mic = TestMic::unavailable();
        let (_, dummy_handle) = TestMic::available();
        let h = harness_with(MockTransport::new(), mic, dummy_handle);

        let err = h.controller.connect().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Audio(AudioError::DeviceUnavailable(_))
        ));
        assert_eq!(h.controller.state(), SessionState::Idle);
        // The transport was never opened
        assert_eq!(h.transport.open_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_transport_open_behaves_like_disconnect() {
        let (mic, handle) = TestMic::available();
        let h = harness_with(MockTransport::failing(), mic, handle);

        assert!(h.controller.connect().await.is_err());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.mic.is_streaming());

        let events = drain(&h.events);
        assert!(!events.contains(&SessionEvent::Connected));
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::Disconnected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_transport_error_tears_the_session_down() {
        let h = harness();
        h.controller.connect().await.unwrap();
        let _ = drain(&h.events);

        h.transport
            .send_server(ServerEvent::Error(TransportError::Runtime(
                "connection reset".to_string(),
            )));
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.mic.is_streaming());
        let events = drain(&h.events);
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::Disconnected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_peer_close_tears_the_session_down() {
        let h = harness();
        h.controller.connect().await.unwrap();
        let _ = drain(&h.events);

        h.transport
            .send_server(ServerEvent::Error(TransportError::ClosedByPeer));
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            drain(&h.events)
                .iter()
                .filter(|e| **e == SessionEvent::Disconnected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_disconnect_racing_connect_releases_fresh_devices() {
        let transport = MockTransport::new();
        let (mic, _mic_handle) = TestMic::available();
        let clock = Arc::new(ManualClock::new());
        let controller_slot: Arc<Mutex<Option<Arc<SessionController>>>> =
            Arc::new(Mutex::new(None));

        // The factory runs after the Connecting transition, so tearing
        // down from inside it lands in the window before the audio slots
        // are stored
        let mic_slot = Mutex::new(Some(mic));
        let slot_for_factory = controller_slot.clone();
        let factory: AudioFactory = Box::new(move |events| {
            if let Some(controller) = slot_for_factory.lock().as_ref() {
                controller.disconnect();
            }
            let input = mic_slot
                .lock()
                .take()
                .ok_or_else(|| AudioError::DeviceUnavailable("already taken".to_string()))?;
            Ok(AudioDevices {
                input: Box::new(input),
                scheduler: Arc::new(PlaybackScheduler::detached(clock.clone(), events)),
            })
        });

        let setup = SessionSetup {
            model: "models/test".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "persona".to_string(),
        };
        let (controller, events) =
            SessionController::with_audio(setup, transport.clone(), factory);
        *controller_slot.lock() = Some(controller.clone());

        controller.connect().await.unwrap();

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.holds_audio());
        assert_eq!(transport.open_calls.load(Ordering::SeqCst), 0);

        let events = drain(&events);
        assert!(!events.contains(&SessionEvent::Connected));
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::Disconnected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_inbound_audio_after_disconnect_is_ignored() {
        let h = harness();
        h.controller.connect().await.unwrap();
        h.controller.disconnect();
        let _ = drain(&h.events);

        let payload = encode(&vec![0.1f32; 2400]).data;
        h.transport.send_server(ServerEvent::Audio { data: payload });
        settle().await;

        assert_eq!(h.scheduler().active_sources(), 0);
        assert!(drain(&h.events).is_empty());
    }
}
