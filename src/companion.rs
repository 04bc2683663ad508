//! Text transcript companion
//!
//! The live session answers in audio. When a text transcript is needed for
//! keyword-triggered events, the end-of-utterance prompt can be answered by a
//! regular `generateContent` call that shares the session's persona and a
//! rolling conversation history.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::transport::protocol::{Content, Part};
use crate::{Error, Result};

/// REST API base
pub const COMPANION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default text model
pub const DEFAULT_COMPANION_MODEL: &str = "gemini-2.0-flash";

/// Entries kept in the rolling history
pub const MAX_HISTORY: usize = 20;

/// Reply length cap
const MAX_OUTPUT_TOKENS: u32 = 200;

/// Upper bound on one `generateContent` round trip
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the end-of-utterance transcript prompt is sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRoute {
    /// Send it as a text turn on the live session
    #[default]
    Live,
    /// Ask the text companion and surface its reply as the transcript
    Companion,
}

impl std::str::FromStr for TranscriptRoute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "companion" => Ok(Self::Companion),
            other => Err(Error::Config(format!("unknown transcript route: {other}"))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: RequestConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate; empty when blocked
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct History {
    system_instruction: String,
    turns: Vec<Content>,
    /// Bumped on every reset; a reply started under an older epoch is not committed
    epoch: u64,
}

/// Text side channel sharing the live session's persona
#[derive(Debug)]
pub struct TextCompanion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    history: Mutex<History>,
}

impl TextCompanion {
    /// Create a companion against the public REST API
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, COMPANION_ENDPOINT.to_string())
    }

    /// Create a companion against a custom base URL
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for the text companion".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            history: Mutex::new(History::default()),
        })
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Start a fresh conversation under a new persona
    pub async fn reset(&self, system_instruction: &str) {
        let mut history = self.history.lock().await;
        history.system_instruction = system_instruction.to_string();
        history.turns.clear();
        history.epoch = history.epoch.wrapping_add(1);
    }

    /// Number of history entries
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.turns.len()
    }

    /// Send `prompt` with the conversation so far and return the reply text
    ///
    /// History is only extended when the request succeeds and no `reset`
    /// happened while it was in flight. The history lock is not held across
    /// the HTTP round trip.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API rejects it
    pub async fn respond(&self, prompt: &str) -> Result<String> {
        let (mut contents, system_instruction, epoch) = {
            let history = self.history.lock().await;
            let mut contents = history.turns.clone();
            contents.push(turn("user", prompt));
            let system_instruction = (!history.system_instruction.is_empty())
                .then(|| turn_without_role(&history.system_instruction));
            (contents, system_instruction, history.epoch)
        };

        let request = GenerateRequest {
            contents: &contents,
            system_instruction,
            generation_config: RequestConfig {
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        tracing::debug!(model = %self.model, turns = contents.len(), "requesting companion reply");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "companion API error");
            return Err(Error::Companion(format!("API error {status}: {body}")));
        }

        let text = response.json::<GenerateResponse>().await?.text();

        let mut history = self.history.lock().await;
        if history.epoch == epoch {
            contents.push(turn("model", &text));
            history.turns = cap_history(contents);
        } else {
            tracing::debug!("conversation reset during companion request, reply not recorded");
        }

        Ok(text)
    }
}

fn turn(role: &str, text: &str) -> Content {
    Content {
        role: Some(role.to_string()),
        parts: vec![Part {
            text: Some(text.to_string()),
            inline_data: None,
        }],
    }
}

fn turn_without_role(text: &str) -> Content {
    Content {
        role: None,
        ..turn("", text)
    }
}

fn cap_history(mut turns: Vec<Content>) -> Vec<Content> {
    if turns.len() > MAX_HISTORY {
        turns.drain(..turns.len() - MAX_HISTORY);
    }
    turns
}
