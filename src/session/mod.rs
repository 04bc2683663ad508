//! Conversational session state and controller

mod controller;

pub use controller::{DEFAULT_TRANSCRIPT_PROMPT, LiveController, SessionController};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::transport::{ConnectionStatus, SessionConfig};

/// Who produced a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Local,
    Remote,
}

/// One line of the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One live connection, discarded on disconnect
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    started_at: DateTime<Utc>,
    conversation: Vec<ConversationEntry>,
    turns: u32,
}

impl Session {
    /// Start a new session record
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            started_at: Utc::now(),
            conversation: Vec::new(),
            turns: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Transcript and typed text so far, oldest first
    #[must_use]
    pub fn conversation(&self) -> &[ConversationEntry] {
        &self.conversation
    }

    /// Completed remote turns
    #[must_use]
    pub const fn turns(&self) -> u32 {
        self.turns
    }

    pub(crate) fn record(&mut self, role: Role, text: impl Into<String>) {
        self.conversation.push(ConversationEntry {
            role,
            text: text.into(),
            at: Utc::now(),
        });
    }

    pub(crate) const fn complete_turn(&mut self) {
        self.turns += 1;
    }
}

/// Notifications delivered to callers of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Connection status changed
    StatusChanged { status: ConnectionStatus },
    /// Local microphone opened or closed
    Recording { active: bool },
    /// Remote audio started or stopped playing
    Speaking { active: bool },
    /// Latest transcript text
    Transcript { text: String },
    /// A buffered utterance was flushed to the transport
    UtteranceSent { frames: usize },
    /// Remote finished its turn
    TurnComplete,
    /// Remote yielded the floor to local speech
    Interrupted,
    /// Device or connection failure; the session is torn down
    Error { kind: ErrorKind, message: String },
}
