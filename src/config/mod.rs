//! Configuration management for the live session engine
//!
//! Values are layered env > TOML file > defaults.

pub mod file;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use self::file::LiveConfigFile;
use crate::companion::{COMPANION_ENDPOINT, DEFAULT_COMPANION_MODEL, TranscriptRoute};
use crate::session::DEFAULT_TRANSCRIPT_PROMPT;
use crate::transport::{DEFAULT_LIVE_MODEL, DEFAULT_VOICE, LIVE_ENDPOINT, SessionConfig};
use crate::voice::{AudioContext, DEFAULT_FRAME_SAMPLES};
use crate::{Error, Result};

/// Default caller-side connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Live session engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the live and companion services
    /// Set via `GEMINI_API_KEY` (or `GOOGLE_API_KEY`)
    pub api_key: Option<String>,

    /// Live service configuration
    pub live: LiveConfig,

    /// Audio device configuration
    pub audio: AudioConfig,

    /// Turn-taking behavior
    pub session: SessionSettings,

    /// Text companion configuration
    pub companion: CompanionConfig,
}

/// Live service configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub output_transcription: bool,
}

/// Audio device configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name (default device when unset)
    pub input_device: Option<String>,
    /// Output device name (default device when unset)
    pub output_device: Option<String>,
    /// Samples per capture frame
    pub frame_samples: usize,
}

/// Turn-taking behavior
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transcript_route: TranscriptRoute,
    pub transcript_prompt: String,
    /// Stop remote playback when local capture begins
    pub barge_in_on_capture: bool,
    /// How long a caller should wait for the session to open
    pub connect_timeout: Duration,
}

/// Text companion configuration
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    pub model: String,
    pub endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            live: LiveConfig {
                endpoint: LIVE_ENDPOINT.to_string(),
                model: DEFAULT_LIVE_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: String::new(),
                output_transcription: false,
            },
            audio: AudioConfig {
                input_device: None,
                output_device: None,
                frame_samples: DEFAULT_FRAME_SAMPLES,
            },
            session: SessionSettings {
                transcript_route: TranscriptRoute::Live,
                transcript_prompt: DEFAULT_TRANSCRIPT_PROMPT.to_string(),
                barge_in_on_capture: false,
                connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            companion: CompanionConfig {
                model: DEFAULT_COMPANION_MODEL.to_string(),
                endpoint: COMPANION_ENDPOINT.to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources(
        fc: LiveConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("GOOGLE_API_KEY"))
            .or(fc.api_key)
            .filter(|k| !k.is_empty());

        let live = LiveConfig {
            endpoint: env("BEACON_LIVE_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or(defaults.live.endpoint),
            model: env("BEACON_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or(defaults.live.model),
            voice: env("BEACON_LIVE_VOICE")
                .or(fc.live.voice)
                .unwrap_or(defaults.live.voice),
            system_instruction: env("BEACON_LIVE_SYSTEM_INSTRUCTION")
                .or(fc.live.system_instruction)
                .unwrap_or_default(),
            output_transcription: env("BEACON_LIVE_OUTPUT_TRANSCRIPTION")
                .map(|v| parse_flag(&v))
                .or(fc.live.output_transcription)
                .unwrap_or(false),
        };

        let frame_samples = match env("BEACON_LIVE_FRAME_SAMPLES") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|e| Error::Config(format!("invalid BEACON_LIVE_FRAME_SAMPLES: {e}")))?,
            None => fc.audio.frame_samples.unwrap_or(DEFAULT_FRAME_SAMPLES),
        };
        if frame_samples == 0 {
            return Err(Error::Config("frame size must be at least one sample".to_string()));
        }

        let audio = AudioConfig {
            input_device: env("BEACON_LIVE_INPUT_DEVICE").or(fc.audio.input_device),
            output_device: env("BEACON_LIVE_OUTPUT_DEVICE").or(fc.audio.output_device),
            frame_samples,
        };

        let transcript_route = env("BEACON_LIVE_TRANSCRIPT_ROUTE")
            .or(fc.session.transcript_route)
            .map(|v| v.parse::<TranscriptRoute>())
            .transpose()?
            .unwrap_or_default();

        let connect_timeout_secs = match env("BEACON_LIVE_CONNECT_TIMEOUT") {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("invalid BEACON_LIVE_CONNECT_TIMEOUT: {e}")))?,
            None => fc
                .session
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let session = SessionSettings {
            transcript_route,
            transcript_prompt: fc
                .session
                .transcript_prompt
                .unwrap_or(defaults.session.transcript_prompt),
            barge_in_on_capture: env("BEACON_LIVE_BARGE_IN")
                .map(|v| parse_flag(&v))
                .or(fc.session.barge_in_on_capture)
                .unwrap_or(false),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        };

        let companion = CompanionConfig {
            model: env("BEACON_LIVE_COMPANION_MODEL")
                .or(fc.companion.model)
                .unwrap_or(defaults.companion.model),
            endpoint: fc.companion.endpoint.unwrap_or(defaults.companion.endpoint),
        };

        Ok(Self {
            api_key,
            live,
            audio,
            session,
            companion,
        })
    }

    /// API key, required for any network use
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::Config("no API key configured (set GEMINI_API_KEY)".to_string())
        })
    }

    /// Session setup derived from the live configuration
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            system_instruction: self.live.system_instruction.clone(),
            output_transcription: self.live.output_transcription,
        }
    }

    /// Audio device selection
    #[must_use]
    pub fn audio_context(&self) -> AudioContext {
        AudioContext::new(
            self.audio.input_device.clone(),
            self.audio.output_device.clone(),
        )
    }

    /// Apply a persona, replacing the system instruction and optionally the voice
    pub fn apply_persona(&mut self, persona: Persona) {
        self.live.system_instruction = persona.system_instruction;
        if let Some(voice) = persona.voice {
            self.live.voice = voice;
        }
    }
}

/// Character a session speaks as
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub name: Option<String>,
    pub system_instruction: String,
    #[serde(default)]
    pub voice: Option<String>,
}

impl Persona {
    /// Load a persona from JSON, TOML, or plain text
    ///
    /// Plain text files are used verbatim as the system instruction.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let persona = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("failed to parse {}: {e}", path.display()))
            })?,
            Some("toml") => toml::from_str(&content).map_err(|e| {
                Error::Config(format!("failed to parse {}: {e}", path.display()))
            })?,
            _ => Self {
                name: None,
                system_instruction: content.trim().to_string(),
                voice: None,
            },
        };

        tracing::debug!(path = %path.display(), "loaded persona");
        Ok(persona)
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(LiveConfigFile::default(), env_of(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert!(config.require_api_key().is_err());
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.audio.frame_samples, 4096);
        assert_eq!(config.session.transcript_route, TranscriptRoute::Live);
        assert!(!config.session.barge_in_on_capture);
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = LiveConfigFile::default();
        fc.live.voice = Some("Puck".to_string());
        fc.live.model = Some("file-model".to_string());
        fc.api_key = Some("file-key".to_string());

        let config = Config::from_sources(
            fc,
            env_of(&[
                ("BEACON_LIVE_VOICE", "Charon"),
                ("GEMINI_API_KEY", "env-key"),
                ("BEACON_LIVE_TRANSCRIPT_ROUTE", "companion"),
                ("BEACON_LIVE_BARGE_IN", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.live.voice, "Charon");
        assert_eq!(config.live.model, "file-model");
        assert_eq!(config.require_api_key().unwrap(), "env-key");
        assert_eq!(config.session.transcript_route, TranscriptRoute::Companion);
        assert!(config.session.barge_in_on_capture);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(
            Config::from_sources(
                LiveConfigFile::default(),
                env_of(&[("BEACON_LIVE_FRAME_SAMPLES", "lots")])
            )
            .is_err()
        );
        assert!(
            Config::from_sources(
                LiveConfigFile::default(),
                env_of(&[("BEACON_LIVE_FRAME_SAMPLES", "0")])
            )
            .is_err()
        );
        assert!(
            Config::from_sources(
                LiveConfigFile::default(),
                env_of(&[("BEACON_LIVE_TRANSCRIPT_ROUTE", "carrier-pigeon")])
            )
            .is_err()
        );
    }

    #[test]
    fn persona_formats() {
        let dir = tempfile::tempdir().unwrap();

        let text = dir.path().join("guide.txt");
        std::fs::write(&text, "  You are a museum guide.\n").unwrap();
        assert_eq!(
            Persona::load(&text).unwrap().system_instruction,
            "You are a museum guide."
        );

        let json = dir.path().join("guide.json");
        std::fs::write(
            &json,
            r#"{"name":"Ada","system_instruction":"Be kind.","voice":"Aoede"}"#,
        )
        .unwrap();
        let persona = Persona::load(&json).unwrap();
        assert_eq!(persona.voice.as_deref(), Some("Aoede"));

        let mut config = Config::default();
        config.apply_persona(persona);
        assert_eq!(config.live.system_instruction, "Be kind.");
        assert_eq!(config.session_config().voice, "Aoede");
    }
}
