//! Gemini Live websocket transport

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{self, ClientMessage, InboundMessage};
use super::{ConnectionStatus, SessionConfig, Transport, TransportEvent, TransportEventSender};
use crate::voice::AudioFrame;
use crate::{Error, Result};

/// Bidirectional streaming endpoint
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Time allowed for the close handshake before the session task is aborted
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// One live socket and the task driving it
struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

/// Live session transport over the Gemini bidirectional websocket API
pub struct GeminiLiveTransport {
    endpoint: Url,
    status: Arc<watch::Sender<ConnectionStatus>>,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for GeminiLiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveTransport")
            .field("host", &self.endpoint.host_str())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl GeminiLiveTransport {
    /// Create a transport for the public endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_endpoint(LIVE_ENDPOINT, api_key)
    }

    /// Create a transport for a custom endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a valid URL or the key is empty
    pub fn with_endpoint(endpoint: &str, api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("live API key is empty".to_string()));
        }

        let endpoint = Url::parse_with_params(endpoint, &[("key", api_key)])
            .map_err(|e| Error::Config(format!("invalid live endpoint: {e}")))?;

        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(Self {
            endpoint,
            status: Arc::new(status),
            connection: Mutex::new(None),
        })
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn send(&self, message: &ClientMessage, what: &'static str) {
        if self.status() != ConnectionStatus::Connected {
            tracing::warn!(message = what, "not connected, dropping outbound message");
            return;
        }

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, message = what, "failed to encode outbound message");
                return;
            }
        };

        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = connection.as_ref()
            && conn.outbound.send(Message::Text(json)).is_err()
        {
            tracing::warn!(message = what, "session task gone, dropping outbound message");
        }
    }
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    async fn connect(&self, config: &SessionConfig, events: TransportEventSender) -> Result<()> {
        self.disconnect().await;

        let setup = ClientMessage::setup(config).to_json()?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        self.status.send_replace(ConnectionStatus::Connecting);
        tracing::info!(model = %config.model, voice = %config.voice, "connecting live session");

        let task = tokio::spawn(run_session(
            self.endpoint.clone(),
            setup,
            outbound_rx,
            events,
            Arc::clone(&self.status),
        ));

        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connection { outbound, task });

        Ok(())
    }

    fn send_audio_frame(&self, frame: &AudioFrame) {
        self.send(&ClientMessage::audio(frame), "audio");
    }

    fn send_text(&self, text: &str) {
        self.send(&ClientMessage::text(text), "text");
    }

    async fn disconnect(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Connection { outbound, mut task }) = connection {
            let _ = outbound.send(Message::Close(None));
            drop(outbound);

            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::debug!("close handshake timed out, aborting session task");
                task.abort();
            }
            tracing::info!("live session disconnected");
        }

        self.status.send_replace(ConnectionStatus::Disconnected);
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        if let Some(conn) = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            conn.task.abort();
        }
    }
}

/// Drive one websocket session to completion
async fn run_session(
    endpoint: Url,
    setup: String,
    outbound: mpsc::UnboundedReceiver<Message>,
    events: TransportEventSender,
    status: Arc<watch::Sender<ConnectionStatus>>,
) {
    let result = session_loop(&endpoint, setup, outbound, &events, &status).await;

    status.send_replace(ConnectionStatus::Disconnected);
    match result {
        Ok(()) => {
            tracing::debug!("live session closed");
            let _ = events.send(TransportEvent::Close);
        }
        Err(e) => {
            tracing::warn!(error = %e, "live session failed");
            let _ = events.send(TransportEvent::Error(e));
        }
    }
}

async fn session_loop(
    endpoint: &Url,
    setup: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: &TransportEventSender,
    status: &watch::Sender<ConnectionStatus>,
) -> Result<()> {
    let (ws, _) = connect_async(endpoint.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(setup)).await?;
    tracing::debug!("setup sent, awaiting acknowledgement");

    let mut session = InboundState::default();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                if let Some(message) = outgoing {
                    sink.send(message).await?;
                } else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(message)) => {
                    if !session.handle(message, events, status)? {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None if session.opened => return Ok(()),
                None => {
                    return Err(Error::Transport(
                        "connection ended before setup completed".to_string(),
                    ));
                }
            }
        }
    }
}

/// Per-connection inbound bookkeeping
#[derive(Debug, Default)]
struct InboundState {
    opened: bool,
    transcript: String,
}

impl InboundState {
    /// Handle one websocket message; returns `false` once the peer closed
    fn handle(
        &mut self,
        message: Message,
        events: &TransportEventSender,
        status: &watch::Sender<ConnectionStatus>,
    ) -> Result<bool> {
        let raw = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or_default();
                tracing::info!(code, reason = %reason, "server closed live session");

                if self.opened {
                    return Ok(false);
                }
                return Err(Error::Transport(format!(
                    "closed during setup ({code}): {reason}"
                )));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Ok(true),
        };

        let messages = match protocol::demux(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring server message");
                return Ok(true);
            }
        };

        for inbound in messages {
            self.dispatch(inbound, events, status);
        }

        Ok(true)
    }

    fn dispatch(
        &mut self,
        inbound: InboundMessage,
        events: &TransportEventSender,
        status: &watch::Sender<ConnectionStatus>,
    ) {
        let event = match inbound {
            InboundMessage::SetupComplete => {
                self.opened = true;
                status.send_replace(ConnectionStatus::Connected);
                tracing::info!("live session connected");
                TransportEvent::Open
            }
            InboundMessage::Audio(chunk) => TransportEvent::Audio(chunk),
            InboundMessage::Text(text) => TransportEvent::Text(text),
            InboundMessage::Transcription(fragment) => {
                self.transcript.push_str(&fragment);
                return;
            }
            InboundMessage::TurnComplete => {
                self.flush_transcript(events);
                TransportEvent::TurnComplete
            }
            InboundMessage::Interrupted => {
                self.flush_transcript(events);
                TransportEvent::Interrupted
            }
            InboundMessage::Unknown(description) => {
                tracing::debug!(message = %description, "ignoring unclassified server message");
                return;
            }
        };

        let _ = events.send(event);
    }

    /// Emit accumulated transcription as one text event
    fn flush_transcript(&mut self, events: &TransportEventSender) {
        let text = std::mem::take(&mut self.transcript);
        let text = text.trim();
        if !text.is_empty() {
            let _ = events.send(TransportEvent::Text(text.to_string()));
        }
    }
}
