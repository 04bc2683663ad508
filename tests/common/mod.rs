//! Shared test utilities
//!
//! Hardware-free stand-ins for the transport, capture and playback seams.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_live::transport::TransportEventSender;
use beacon_live::voice::{
    AudioPlayback, AudioSink, CAPTURE_SAMPLE_RATE, CaptureUnit, FrameDispatcher, FrameSender,
    PlaybackEvent,
};
use beacon_live::{
    AudioFrame, ConnectionStatus, Error, Result, SessionConfig, SessionController, Transport,
    TransportEvent,
};
use tokio::sync::{Semaphore, mpsc};

/// Let spawned tasks run to their next suspension point
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// What the mock transport does when asked to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Emit `Open` immediately
    Open,
    /// Stay connecting until the test calls `open`
    Pending,
    /// Emit an `Error` event
    FailEvent,
    /// Return an error from `connect`
    FailReturn,
}

/// Something the controller sent over the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    /// Audio frame by sequence number
    Audio(u64),
    Text(String),
}

struct TransportState {
    behavior: ConnectBehavior,
    status: ConnectionStatus,
    events: Option<TransportEventSender>,
    sent: Vec<Sent>,
    connects: usize,
    disconnects: usize,
}

/// In-memory transport recording everything sent
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                behavior,
                status: ConnectionStatus::Disconnected,
                events: None,
                sent: Vec::new(),
                connects: 0,
                disconnects: 0,
            })),
        }
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// Complete a pending connection
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = ConnectionStatus::Connected;
        if let Some(events) = &state.events {
            events.send(TransportEvent::Open).unwrap();
        }
    }

    /// Deliver an inbound event on the current connection
    pub fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        state
            .events
            .as_ref()
            .expect("no active connection")
            .send(event)
            .expect("controller dropped the event channel");
    }

    /// Sender of the current connection, for stale-event tests
    pub fn events_sender(&self) -> Option<TransportEventSender> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _config: &SessionConfig, events: TransportEventSender) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events = None;
        state.connects += 1;
        state.status = ConnectionStatus::Connecting;

        match state.behavior {
            ConnectBehavior::Open => {
                state.status = ConnectionStatus::Connected;
                events.send(TransportEvent::Open).unwrap();
            }
            ConnectBehavior::Pending => {}
            ConnectBehavior::FailEvent => {
                state.status = ConnectionStatus::Disconnected;
                events
                    .send(TransportEvent::Error(Error::Transport(
                        "handshake failed".to_string(),
                    )))
                    .unwrap();
            }
            ConnectBehavior::FailReturn => {
                state.status = ConnectionStatus::Disconnected;
                return Err(Error::Transport("connection refused".to_string()));
            }
        }

        state.events = Some(events);
        Ok(())
    }

    fn send_audio_frame(&self, frame: &AudioFrame) {
        let mut state = self.state.lock().unwrap();
        if state.status == ConnectionStatus::Connected {
            state.sent.push(Sent::Audio(frame.sequence()));
        }
    }

    fn send_text(&self, text: &str) {
        let mut state = self.state.lock().unwrap();
        if state.status == ConnectionStatus::Connected {
            state.sent.push(Sent::Text(text.to_string()));
        }
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.events = None;
        state.status = ConnectionStatus::Disconnected;
    }

    fn status(&self) -> ConnectionStatus {
        self.state.lock().unwrap().status
    }
}

struct CaptureState {
    fail: bool,
    dispatcher: Option<FrameDispatcher>,
    frame_samples: usize,
    starts: usize,
    stops: usize,
}

/// Capture unit fed by the test instead of a microphone
#[derive(Clone)]
pub struct ScriptedCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl ScriptedCapture {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState {
                fail: false,
                dispatcher: None,
                frame_samples,
                starts: 0,
                stops: 0,
            })),
        }
    }

    /// Make the next `start` fail as if the device were missing
    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail = true;
    }

    /// Feed samples as a device callback would
    pub fn feed(&self, samples: &[f32]) {
        if let Some(dispatcher) = self.state.lock().unwrap().dispatcher.as_mut() {
            dispatcher.push(samples);
        }
    }

    /// Feed exactly `n` full frames of a constant level
    pub fn feed_frames(&self, n: usize, level: f32) {
        let frame_samples = self.state.lock().unwrap().frame_samples;
        self.feed(&vec![level; frame_samples * n]);
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl CaptureUnit for ScriptedCapture {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail) {
            return Err(Error::DeviceUnavailable("no input device available".to_string()));
        }

        let dispatcher = FrameDispatcher::new(frames, state.frame_samples, CAPTURE_SAMPLE_RATE, 1)?;
        state.starts += 1;
        state.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(dispatcher) = state.dispatcher.take() {
            dispatcher.deactivate();
            state.stops += 1;
        }
    }

    fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().dispatcher.is_some()
    }
}

/// Sink log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLog {
    /// Started rendering a chunk of this many samples
    Start(usize),
    /// Finished rendering it
    End(usize),
}

/// Audio sink that records what it renders
///
/// In gated mode each chunk waits for `release` before completing.
#[derive(Clone)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<SinkLog>>>,
    played: Arc<Mutex<Vec<Vec<f32>>>>,
    gate: Option<Arc<Semaphore>>,
    halts: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl RecordingSink {
    /// Chunks complete as soon as they start
    pub fn instant() -> Self {
        Self::build(None)
    }

    /// Chunks complete only when released
    pub fn gated() -> Self {
        Self::build(Some(Arc::new(Semaphore::new(0))))
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            played: Arc::new(Mutex::new(Vec::new())),
            gate,
            halts: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let `n` gated chunks finish
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn log(&self) -> Vec<SinkLog> {
        self.log.lock().unwrap().clone()
    }

    /// Samples of every chunk that started rendering, in order
    pub fn played(&self) -> Vec<Vec<f32>> {
        self.played.lock().unwrap().clone()
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, samples: Vec<f32>, _sample_rate: u32) -> Result<()> {
        let len = samples.len();
        self.log.lock().unwrap().push(SinkLog::Start(len));
        self.played.lock().unwrap().push(samples);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.log.lock().unwrap().push(SinkLog::End(len));
        Ok(())
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Controller over the mock components
pub type TestController = SessionController<MockTransport, ScriptedCapture, AudioPlayback<RecordingSink>>;

/// Handles the test keeps after the controller takes ownership
pub struct Harness {
    pub controller: TestController,
    pub transport: MockTransport,
    pub capture: ScriptedCapture,
    pub sink: RecordingSink,
}

/// Build a controller with small frames for fast tests
pub fn harness(behavior: ConnectBehavior, sink: RecordingSink) -> Harness {
    let transport = MockTransport::new(behavior);
    let capture = ScriptedCapture::new(4);
    let (playback, playback_events) = AudioPlayback::new(sink.clone());

    let controller = SessionController::new(
        transport.clone(),
        capture.clone(),
        playback,
        playback_events,
        SessionConfig::default(),
    );

    Harness {
        controller,
        transport,
        capture,
        sink,
    }
}

/// Collect playback lifecycle events already delivered
pub fn drain_playback(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
