//! Turn-taking orchestration
//!
//! The controller owns the transport, capture unit and playback unit and
//! consumes their events from a single loop (`process_next`). Callers observe
//! the session through a broadcast of [`SessionEvent`]s.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{Role, Session, SessionEvent};
use crate::companion::{TextCompanion, TranscriptRoute};
use crate::config::Config;
use crate::transport::{
    ConnectionStatus, GeminiLiveTransport, SessionConfig, Transport, TransportEvent,
};
use crate::voice::{
    AudioCapture, AudioFrame, AudioPlayback, CaptureUnit, CpalSink, PlaybackEvent, PlaybackUnit,
};
use crate::{Error, Result};

/// Prompt sent after each utterance to obtain a text transcript
pub const DEFAULT_TRANSCRIPT_PROMPT: &str = "The user just spoke to you. Continue the conversation naturally. Remember to mention the key information from your character background.";

/// Buffered events per subscriber before the slowest one lags
const EVENT_CAPACITY: usize = 256;

/// Controller wired to the live service and local audio devices
pub type LiveController =
    SessionController<GeminiLiveTransport, AudioCapture, AudioPlayback<CpalSink>>;

/// Reply from the text companion, tagged with the session that asked
struct CompanionReply {
    session: Uuid,
    result: Result<String>,
}

enum Input {
    Transport(Option<TransportEvent>),
    Playback(PlaybackEvent),
    Companion(CompanionReply),
}

/// Composes transport, capture and playback into one conversation
pub struct SessionController<T, C, P> {
    transport: T,
    capture: C,
    playback: P,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    frames: Option<mpsc::UnboundedReceiver<AudioFrame>>,
    companion: Option<Arc<TextCompanion>>,
    companion_tx: mpsc::UnboundedSender<CompanionReply>,
    companion_rx: mpsc::UnboundedReceiver<CompanionReply>,
    route: TranscriptRoute,
    transcript_prompt: String,
    barge_in_on_capture: bool,
    config: SessionConfig,
    session: Option<Session>,
    status: ConnectionStatus,
    recording: bool,
    speaking: bool,
    transcript: Option<String>,
    last_error: Option<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport, C: CaptureUnit, P: PlaybackUnit> SessionController<T, C, P> {
    /// Create a disconnected controller
    ///
    /// `playback_events` must be the lifecycle receiver paired with `playback`.
    #[must_use]
    pub fn new(
        transport: T,
        capture: C,
        playback: P,
        playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
        config: SessionConfig,
    ) -> Self {
        let (companion_tx, companion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            transport,
            capture,
            playback,
            playback_events,
            transport_events: None,
            frames: None,
            companion: None,
            companion_tx,
            companion_rx,
            route: TranscriptRoute::Live,
            transcript_prompt: DEFAULT_TRANSCRIPT_PROMPT.to_string(),
            barge_in_on_capture: false,
            config,
            session: None,
            status: ConnectionStatus::Disconnected,
            recording: false,
            speaking: false,
            transcript: None,
            last_error: None,
            events,
        }
    }

    /// Attach a text companion for the `Companion` transcript route
    #[must_use]
    pub fn with_companion(mut self, companion: Arc<TextCompanion>) -> Self {
        self.companion = Some(companion);
        self
    }

    /// Choose where the end-of-utterance transcript prompt goes
    #[must_use]
    pub const fn with_transcript_route(mut self, route: TranscriptRoute) -> Self {
        self.route = route;
        self
    }

    /// Stop remote playback when local capture begins
    #[must_use]
    pub const fn with_barge_in_on_capture(mut self, enabled: bool) -> Self {
        self.barge_in_on_capture = enabled;
        self
    }

    /// Override the prompt sent after each utterance
    #[must_use]
    pub fn with_transcript_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.transcript_prompt = prompt.into();
        self
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replace the session configuration used by the next `connect`
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    /// Configuration for the current or next session
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connection status as seen by the controller
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether the local microphone is open
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether remote audio is playing
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Latest transcript of the current session
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    /// Current session, if connecting or connected
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Underlying transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying playback unit
    #[must_use]
    pub const fn playback(&self) -> &P {
        &self.playback
    }

    /// Start a new session
    ///
    /// Returns once the attempt is underway; the session is usable after
    /// `StatusChanged { Connected }`. A failed attempt is reported as an
    /// `Error` event and leaves the controller disconnected.
    ///
    /// # Errors
    ///
    /// Returns `Error::State` if already connecting or connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Disconnected {
            return Err(Error::State(format!("cannot connect while {}", self.status)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport_events = Some(rx);
        self.last_error = None;

        let session = Session::new(self.config.clone());
        tracing::debug!(session = %session.id(), "starting session");
        self.session = Some(session);

        if let Some(companion) = &self.companion {
            companion.reset(&self.config.system_instruction).await;
        }

        self.set_status(ConnectionStatus::Connecting);

        if let Err(e) = self.transport.connect(&self.config, tx).await {
            self.fail(&e).await;
        }

        Ok(())
    }

    /// Tear down any current session and start a new one
    ///
    /// # Errors
    ///
    /// Returns error if the new connection cannot be started
    pub async fn reconnect(&mut self) -> Result<()> {
        self.teardown().await;
        self.connect().await
    }

    /// Close the session; safe from any state
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    /// Disconnect and release the output device
    pub async fn shutdown(&mut self) {
        self.teardown().await;
        self.playback.close();
    }

    /// Open the microphone and start buffering an utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::State` if not connected or already capturing, or
    /// `Error::DeviceUnavailable` if the microphone cannot be opened, in which
    /// case the session is torn down.
    pub async fn begin_capture(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Connected {
            return Err(Error::State(format!("cannot capture while {}", self.status)));
        }
        if self.recording {
            return Err(Error::State("already capturing".to_string()));
        }

        if self.barge_in_on_capture && self.speaking {
            tracing::debug!("barge-in: stopping playback before capture");
            self.stop_playback();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.start(tx) {
            self.fail(&e).await;
            return Err(e);
        }

        self.frames = Some(rx);
        self.set_recording(true);
        tracing::debug!("capture started");
        Ok(())
    }

    /// Close the microphone and send the buffered utterance
    ///
    /// Frames go out in capture order, followed by one transcript prompt if
    /// anything was captured. Returns the number of frames sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::State` if not capturing
    pub fn end_capture(&mut self) -> Result<usize> {
        if !self.recording {
            return Err(Error::State("not capturing".to_string()));
        }

        self.capture.stop();
        self.set_recording(false);

        let mut frames = Vec::new();
        if let Some(mut rx) = self.frames.take() {
            while let Ok(frame) = rx.try_recv() {
                frames.push(frame);
            }
        }

        for frame in &frames {
            self.transport.send_audio_frame(frame);
        }

        let count = frames.len();
        tracing::debug!(frames = count, "utterance flushed");
        self.emit(SessionEvent::UtteranceSent { frames: count });

        if count > 0 {
            self.request_transcript();
        }

        Ok(count)
    }

    /// Send a typed text turn
    ///
    /// # Errors
    ///
    /// Returns `Error::State` if not connected
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        if self.status != ConnectionStatus::Connected {
            return Err(Error::State(format!("cannot send text while {}", self.status)));
        }

        self.transport.send_text(text);
        if let Some(session) = self.session.as_mut() {
            session.record(Role::Local, text);
        }
        Ok(())
    }

    /// Wait for the next input from the transport, playback or companion and handle it
    pub async fn process_next(&mut self) {
        let input = tokio::select! {
            event = next_event(&mut self.transport_events) => Input::Transport(event),
            Some(event) = self.playback_events.recv() => Input::Playback(event),
            Some(reply) = self.companion_rx.recv() => Input::Companion(reply),
        };

        self.handle(input).await;
    }

    /// Handle every input that is already available; returns how many were handled
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;

        loop {
            let input = if let Some(event) = self
                .transport_events
                .as_mut()
                .and_then(|rx| rx.try_recv().ok())
            {
                Input::Transport(Some(event))
            } else if let Ok(event) = self.playback_events.try_recv() {
                Input::Playback(event)
            } else if let Ok(reply) = self.companion_rx.try_recv() {
                Input::Companion(reply)
            } else {
                break;
            };

            self.handle(input).await;
            handled += 1;
        }

        handled
    }

    /// Process inputs until the session opens or fails
    ///
    /// Callers bound this with their own timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the session ends before opening
    pub async fn wait_until_connected(&mut self) -> Result<()> {
        loop {
            match self.status {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Disconnected => {
                    return Err(Error::Transport(self.last_error.clone().unwrap_or_else(
                        || "session closed before opening".to_string(),
                    )));
                }
                ConnectionStatus::Connecting => self.process_next().await,
            }
        }
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Transport(Some(event)) => self.on_transport(event).await,
            Input::Transport(None) => {
                self.transport_events = None;
                if self.status != ConnectionStatus::Disconnected {
                    tracing::warn!("transport event stream ended");
                    self.teardown().await;
                }
            }
            Input::Playback(event) => self.on_playback(event),
            Input::Companion(reply) => self.on_companion(reply),
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.status == ConnectionStatus::Connecting {
                    self.set_status(ConnectionStatus::Connected);
                    tracing::info!("session open");
                } else {
                    tracing::debug!(status = %self.status, "ignoring open");
                }
            }
            TransportEvent::Audio(chunk) => self.playback.enqueue(chunk),
            TransportEvent::Text(text) => self.set_transcript(text),
            TransportEvent::TurnComplete => {
                if let Some(session) = self.session.as_mut() {
                    session.complete_turn();
                }
                self.emit(SessionEvent::TurnComplete);
            }
            TransportEvent::Interrupted => {
                tracing::debug!("remote interrupted, stopping playback");
                self.stop_playback();
                self.emit(SessionEvent::Interrupted);
            }
            TransportEvent::Error(e) => self.fail(&e).await,
            TransportEvent::Close => {
                tracing::info!("session closed by remote");
                self.teardown().await;
            }
        }
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => self.set_speaking(true),
            PlaybackEvent::Ended => self.set_speaking(false),
        }
    }

    fn on_companion(&mut self, reply: CompanionReply) {
        if self.session.as_ref().map(Session::id) != Some(reply.session) {
            tracing::debug!("dropping companion reply for a previous session");
            return;
        }

        match reply.result {
            Ok(text) => self.set_transcript(text),
            Err(e) => tracing::warn!(error = %e, "companion transcript failed"),
        }
    }

    fn request_transcript(&mut self) {
        let companion = match (self.route, &self.companion, &self.session) {
            (TranscriptRoute::Companion, Some(companion), Some(session)) => {
                Some((Arc::clone(companion), session.id()))
            }
            (TranscriptRoute::Companion, None, _) => {
                tracing::warn!("no companion configured, sending transcript prompt to live session");
                None
            }
            _ => None,
        };

        let prompt = self.transcript_prompt.clone();
        match companion {
            Some((companion, session)) => {
                let tx = self.companion_tx.clone();
                tokio::spawn(async move {
                    let result = companion.respond(&prompt).await;
                    let _ = tx.send(CompanionReply { session, result });
                });
            }
            None => self.transport.send_text(&prompt),
        }
    }

    fn set_transcript(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.record(Role::Remote, text.clone());
        }
        self.transcript = Some(text.clone());
        self.emit(SessionEvent::Transcript { text });
    }

    /// Stop playback and apply the resulting lifecycle events immediately
    fn stop_playback(&mut self) {
        self.playback.stop();
        while let Ok(event) = self.playback_events.try_recv() {
            self.on_playback(event);
        }
    }

    async fn fail(&mut self, error: &Error) {
        tracing::warn!(error = %error, kind = ?error.kind(), "session failed");
        self.teardown().await;
        self.last_error = Some(error.to_string());
        self.emit(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Return to a clean disconnected state
    async fn teardown(&mut self) {
        self.capture.stop();
        self.frames = None;
        self.set_recording(false);

        self.stop_playback();
        self.set_speaking(false);

        // Events from the old connection become unreachable
        self.transport_events = None;
        self.transport.disconnect().await;

        if let Some(session) = self.session.take() {
            tracing::info!(
                session = %session.id(),
                turns = session.turns(),
                entries = session.conversation().len(),
                "session ended"
            );
        }
        self.transcript = None;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(SessionEvent::StatusChanged { status });
        }
    }

    fn set_recording(&mut self, active: bool) {
        if self.recording != active {
            self.recording = active;
            self.emit(SessionEvent::Recording { active });
        }
    }

    fn set_speaking(&mut self, active: bool) {
        if self.speaking != active {
            self.speaking = active;
            self.emit(SessionEvent::Speaking { active });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl LiveController {
    /// Build a controller for the live service from configuration
    ///
    /// No device or network resource is acquired until `connect` and
    /// `begin_capture`.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the endpoint is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let transport = GeminiLiveTransport::with_endpoint(&config.live.endpoint, api_key)?;

        let context = config.audio_context();
        let capture = AudioCapture::new(context.clone(), config.audio.frame_samples);
        let (playback, playback_events) = AudioPlayback::new(CpalSink::new(context));

        let mut controller = Self::new(
            transport,
            capture,
            playback,
            playback_events,
            config.session_config(),
        )
        .with_transcript_route(config.session.transcript_route)
        .with_barge_in_on_capture(config.session.barge_in_on_capture)
        .with_transcript_prompt(config.session.transcript_prompt.clone());

        if config.session.transcript_route == TranscriptRoute::Companion {
            let companion = TextCompanion::with_base_url(
                api_key.to_string(),
                config.companion.model.clone(),
                config.companion.endpoint.clone(),
            )?;
            controller = controller.with_companion(Arc::new(companion));
        }

        Ok(controller)
    }
}

/// Next transport event, or pending forever when there is no connection
async fn next_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
