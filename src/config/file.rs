//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-live/config.toml` as a persistent config
//! source, overridable with `BEACON_LIVE_CONFIG`. All fields are optional;
//! the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "BEACON_LIVE_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveConfigFile {
    /// API key for the live and companion services
    #[serde(default)]
    pub api_key: Option<String>,

    /// Live session configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Audio device configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Turn-taking behavior
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Text companion configuration
    #[serde(default)]
    pub companion: CompanionFileConfig,
}

/// Live service configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Websocket endpoint override
    pub endpoint: Option<String>,

    /// Live model (e.g. "gemini-2.0-flash-exp")
    pub model: Option<String>,

    /// Prebuilt voice (e.g. "Kore")
    pub voice: Option<String>,

    /// Persona / system instruction
    pub system_instruction: Option<String>,

    /// Request output audio transcription
    pub output_transcription: Option<bool>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,

    /// Samples per capture frame
    pub frame_samples: Option<usize>,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// "live" or "companion"
    pub transcript_route: Option<String>,

    /// Prompt sent after each utterance to obtain a transcript
    pub transcript_prompt: Option<String>,

    /// Stop playback when capture begins
    pub barge_in_on_capture: Option<bool>,

    /// Caller-side connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

/// Text companion configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompanionFileConfig {
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

/// Load the TOML config file from `BEACON_LIVE_CONFIG` or the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveConfigFile {
    let path = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    path.map(|p| load_config_file_from(&p)).unwrap_or_default()
}

/// Load a TOML config file from `path`
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> LiveConfigFile {
    if !path.exists() {
        return LiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-live/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-live")
            .join("config.toml")
    })
}
