use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{SpeechBackend, VoiceCatalog, VoiceProfile};
use crate::core::config::resolve_api_key;
use crate::core::error::BackendError;
use crate::core::state::SpeechRate;
use crate::utils::text::split_for_synthesis;

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";
/// Request input limit of the speech endpoint.
const MAX_INPUT_CHARS: usize = 4096;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiTtsConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice", alias = "voice")]
    pub default_voice: String,
}

fn default_model() -> String {
    "tts-1".to_string()
}
fn default_voice() -> String {
    "nova".to_string()
}

impl Default for OpenAiTtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            default_voice: default_voice(),
        }
    }
}

pub fn builtin_voices() -> Vec<VoiceProfile> {
    ["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
        .iter()
        .map(|id| {
            let gender = match *id {
                "echo" | "fable" | "onyx" => "male",
                "nova" | "shimmer" => "female",
                _ => "neutral",
            };
            let mut name = id.to_string();
            if let Some(first) = name.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            VoiceProfile::new(id, &name, gender, id, "", "Standard")
        })
        .collect()
}

#[derive(Serialize)]
struct OpenAiTtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f64,
}

pub struct OpenAiTtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    catalog: VoiceCatalog,
}

impl OpenAiTtsClient {
    pub fn new(config: OpenAiTtsConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), "OPENAI_API_KEY")
            .context("OpenAI API key missing (set speech.api_key or OPENAI_API_KEY)")?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model,
            catalog: VoiceCatalog::new(builtin_voices(), config.default_voice),
        })
    }

    async fn request(&self, input: &str, voice: &VoiceProfile, speed: f64) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = OpenAiTtsRequest {
            model: &self.model,
            input,
            voice: &voice.voice_id,
            response_format: "mp3",
            speed,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI TTS")?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("OpenAI TTS API error ({}): {}", status, error_text);
        }

        let audio = resp.bytes().await.context("Failed to read OpenAI TTS response body")?;
        debug!("OpenAI TTS synthesis complete, {} bytes", audio.len());
        Ok(audio.to_vec())
    }
}

/// Speed multiplier accepted by the endpoint.
fn speed_for(rate: SpeechRate) -> f64 {
    rate.as_speed().clamp(0.25, 4.0)
}

#[async_trait]
impl SpeechBackend for OpenAiTtsClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        rate: SpeechRate,
    ) -> Result<Vec<u8>, BackendError> {
        let speed = speed_for(rate);
        let mut audio = Vec::new();
        for piece in split_for_synthesis(text, MAX_INPUT_CHARS) {
            let bytes = self
                .request(&piece, voice, speed)
                .await
                .map_err(|e| BackendError::from_anyhow("openai", e))?;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }
}
