//! Error types for the live session engine

use serde::Serialize;
use thiserror::Error;

/// Result type alias for live session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the live session engine
#[derive(Debug, Error)]
pub enum Error {
    /// Capture or playback device cannot be acquired
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection failed or dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound message could not be classified
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    State(String),

    /// Audio processing error (decode, resample)
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transcript companion error
    #[error("companion error: {0}")]
    Companion(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coarse error classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Audio device could not be acquired
    DeviceUnavailable,
    /// Connection-level failure
    Transport,
    /// Unclassifiable inbound message
    Protocol,
    /// Operation rejected in the current state
    State,
    /// Anything else (config, audio, io, http)
    Other,
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::Transport(_) | Self::Http(_) => ErrorKind::Transport,
            Self::Protocol(_) | Self::Serialization(_) => ErrorKind::Protocol,
            Self::State(_) => ErrorKind::State,
            Self::Audio(_) | Self::Config(_) | Self::Companion(_) | Self::Io(_) | Self::Toml(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether the caller can recover by retrying (reconnect or re-acquire the device)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceUnavailable | ErrorKind::Transport
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(
            Error::DeviceUnavailable("no mic".into()).kind(),
            ErrorKind::DeviceUnavailable
        );
        assert_eq!(Error::Transport("reset".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::Protocol("bad".into()).kind(), ErrorKind::Protocol);
        assert_eq!(Error::State("busy".into()).kind(), ErrorKind::State);
        assert_eq!(Error::Audio("odd".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn recoverable_errors() {
        assert!(Error::DeviceUnavailable("x".into()).is_recoverable());
        assert!(Error::Transport("x".into()).is_recoverable());
        assert!(!Error::State("x".into()).is_recoverable());
        assert!(!Error::Protocol("x".into()).is_recoverable());
    }
}
