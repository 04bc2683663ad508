//! Live session transport
//!
//! The transport is the only component that speaks the remote wire protocol.
//! Status moves `Disconnected -> Connecting -> Connected -> Disconnected`;
//! a failed `Connecting` falls straight back to `Disconnected` and the caller
//! decides whether to connect again.

mod gemini;
pub mod protocol;

pub use gemini::{GeminiLiveTransport, LIVE_ENDPOINT};
pub use protocol::InboundMessage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;
use crate::voice::{AudioFrame, PlaybackChunk};

/// Default live model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-exp";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Transport connection status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session; sends are dropped
    #[default]
    Disconnected,
    /// Socket opening or setup not yet acknowledged
    Connecting,
    /// Setup acknowledged, ready for audio and text
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Per-session configuration sent in the setup message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Live model name, with or without the `models/` prefix
    pub model: String,
    /// Prebuilt voice identity
    pub voice: String,
    /// Persona / system instruction
    pub system_instruction: String,
    /// Ask the service to transcribe its own audio output
    pub output_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: String::new(),
            output_transcription: false,
        }
    }
}

impl SessionConfig {
    /// Use the given system instruction
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Use the given voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }
}

/// Events raised by a transport for one connection
#[derive(Debug)]
pub enum TransportEvent {
    /// Session is ready for input
    Open,
    /// Remote audio to play
    Audio(PlaybackChunk),
    /// Remote text or transcript
    Text(String),
    /// Remote finished its turn
    TurnComplete,
    /// Remote detected local speech and yielded the floor
    Interrupted,
    /// Connection failed or dropped
    Error(crate::Error),
    /// Connection closed
    Close,
}

/// Sender half handed to a transport on connect
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Bidirectional live session transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session, reporting its lifecycle on `events`
    ///
    /// Any existing connection is closed first. Returns once the attempt is
    /// underway; `Open` or `Error` arrives on `events`.
    ///
    /// # Errors
    ///
    /// Returns error if the attempt cannot be started at all
    async fn connect(&self, config: &SessionConfig, events: TransportEventSender) -> Result<()>;

    /// Send one capture frame; dropped with a warning when not connected
    fn send_audio_frame(&self, frame: &AudioFrame);

    /// Send a text turn; dropped with a warning when not connected
    fn send_text(&self, text: &str);

    /// Close the session; safe from any state
    async fn disconnect(&self);

    /// Current status
    fn status(&self) -> ConnectionStatus;
}
