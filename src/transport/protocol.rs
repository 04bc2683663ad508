//! Gemini Live bidirectional wire protocol
//!
//! Outbound messages are JSON objects keyed by message type (`setup`,
//! `realtimeInput`, `clientContent`). Inbound frames may arrive as text or
//! binary websocket messages and carry the same JSON shape.

use serde::{Deserialize, Serialize};

use super::SessionConfig;
use crate::voice::{AudioFrame, PLAYBACK_SAMPLE_RATE, PlaybackChunk, pcm};
use crate::{Error, Result};

/// Client to server message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Serializes as `{}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Role-tagged list of parts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One piece of content: text or inline media
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 media payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Session setup for `config`
    #[must_use]
    pub fn setup(config: &SessionConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        let system_instruction = (!config.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
                inline_data: None,
            }],
        });

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
            output_audio_transcription: config.output_transcription.then(Empty::default),
        })
    }

    /// Real-time audio input for one capture frame
    #[must_use]
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: format!("audio/pcm;rate={}", frame.sample_rate()),
                data: pcm::encode_base64(&frame.to_pcm16()),
            }],
        })
    }

    /// Complete user text turn
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }

    /// Serialize to a JSON string
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server to client message
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Setup acknowledged; the session accepts input
    SetupComplete,
    /// Audio payload
    Audio(PlaybackChunk),
    /// Text part of the model turn
    Text(String),
    /// Fragment of the output audio transcription
    Transcription(String),
    /// Model finished its turn
    TurnComplete,
    /// Model output was interrupted by local speech
    Interrupted,
    /// Anything else, described for logging
    Unknown(String),
}

/// Classify one inbound frame
///
/// An interrupted frame yields only `Interrupted`. Otherwise model parts come
/// first in order, then any transcription fragment, then `TurnComplete`.
///
/// # Errors
///
/// Returns `Error::Protocol` if the frame is not a JSON object
pub fn demux(raw: &[u8]) -> Result<Vec<InboundMessage>> {
    let message: ServerMessage = serde_json::from_slice(raw)
        .map_err(|e| Error::Protocol(format!("malformed server message: {e}")))?;

    let mut out = Vec::new();

    if message.setup_complete.is_some() {
        out.push(InboundMessage::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            return Ok(vec![InboundMessage::Interrupted]);
        }

        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                out.push(classify_blob(blob));
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                out.push(InboundMessage::Text(text));
            }
        }

        if let Some(text) = content
            .output_transcription
            .and_then(|t| t.text)
            .filter(|t| !t.is_empty())
        {
            out.push(InboundMessage::Transcription(text));
        }

        if content.turn_complete {
            out.push(InboundMessage::TurnComplete);
        }
    }

    if message.go_away.is_some() {
        out.push(InboundMessage::Unknown("goAway".to_string()));
    }

    if out.is_empty() {
        out.push(InboundMessage::Unknown(preview(raw)));
    }

    Ok(out)
}

fn classify_blob(blob: Blob) -> InboundMessage {
    if !blob.mime_type.starts_with("audio/") {
        return InboundMessage::Unknown(format!("inline data {}", blob.mime_type));
    }

    match pcm::decode_base64(&blob.data) {
        Ok(bytes) => InboundMessage::Audio(PlaybackChunk::new(
            bytes,
            sample_rate_from_mime(&blob.mime_type),
        )),
        Err(e) => InboundMessage::Unknown(format!("undecodable audio: {e}")),
    }
}

/// Parse `rate=` from a MIME descriptor such as `audio/pcm;rate=24000`
#[must_use]
pub fn sample_rate_from_mime(mime: &str) -> u32 {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(PLAYBACK_SAMPLE_RATE)
}

fn preview(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.chars().take(120).collect()
}
