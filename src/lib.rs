//! Beacon Live - Real-time voice session engine
//!
//! This library runs a live, bidirectional audio conversation between the
//! local microphone and speaker and a remote generative-voice service:
//! - Microphone capture into fixed 16 kHz PCM frames
//! - Queued, strictly ordered playback of 24 kHz PCM chunks
//! - The Gemini Live websocket protocol
//! - Turn-taking, interruption and transcript handling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Caller                           │
//! │   connect │ begin/end capture │ send_text │ events  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Session Controller                     │
//! │   status │ recording │ speaking │ transcript        │
//! └───────┬──────────────────┬───────────────────┬──────┘
//!         │                  │                   │
//! ┌───────▼──────┐  ┌────────▼────────┐  ┌───────▼──────┐
//! │   Capture    │  │    Transport    │  │   Playback   │
//! │ (mic thread) │  │   (websocket)   │  │ (out thread) │
//! └──────────────┘  └─────────────────┘  └──────────────┘
//! ```

pub mod companion;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use companion::{TextCompanion, TranscriptRoute};
pub use config::{Config, Persona};
pub use error::{Error, ErrorKind, Result};
pub use session::{
    ConversationEntry, LiveController, Role, Session, SessionController, SessionEvent,
};
pub use transport::{
    ConnectionStatus, GeminiLiveTransport, SessionConfig, Transport, TransportEvent,
};
pub use voice::{AudioContext, AudioFrame, PlaybackChunk};
