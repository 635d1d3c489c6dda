use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{BackendError, Error};
use crate::core::io::write_file;
use crate::core::state::SpeechRate;

pub mod edge;
pub mod openai;

pub use edge::EdgeTtsConfig;
pub use openai::OpenAiTtsConfig;

/// A narrator voice as offered to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub key: String,
    pub name: String,
    pub gender: String,
    /// Provider-side identifier, e.g. `en-US-AriaNeural` or `nova`.
    pub voice_id: String,
    #[serde(default)]
    pub accent: String,
    #[serde(default)]
    pub style: String,
}

impl VoiceProfile {
    pub fn new(key: &str, name: &str, gender: &str, voice_id: &str, accent: &str, style: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            gender: gender.to_string(),
            voice_id: voice_id.to_string(),
            accent: accent.to_string(),
            style: style.to_string(),
        }
    }
}

/// Voices of one provider plus the key used when a lookup misses.
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    voices: Vec<VoiceProfile>,
    default_key: String,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<VoiceProfile>, default_key: impl Into<String>) -> Self {
        Self {
            voices,
            default_key: default_key.into(),
        }
    }

    pub fn voices(&self) -> &[VoiceProfile] {
        &self.voices
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn get(&self, key: &str) -> Option<&VoiceProfile> {
        self.voices.iter().find(|v| v.key.eq_ignore_ascii_case(key))
    }

    /// Looks `key` up, falling back to the default voice and then to the
    /// first entry. `None` only for an empty catalogue.
    pub fn resolve(&self, key: Option<&str>) -> Option<&VoiceProfile> {
        key.and_then(|k| self.get(k))
            .or_else(|| self.get(&self.default_key))
            .or_else(|| self.voices.first())
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn provider(&self) -> &str;

    fn catalog(&self) -> &VoiceCatalog;

    /// Encoded MP3 bytes for `text` spoken by `voice`.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        rate: SpeechRate,
    ) -> Result<Vec<u8>, BackendError>;
}

/// Synthesizes `text` straight into `output`. Empty provider output is an
/// error so a zero-byte chunk never reaches the assembler.
pub async fn synthesize_to_file(
    backend: &dyn SpeechBackend,
    text: &str,
    voice: &VoiceProfile,
    rate: SpeechRate,
    output: &Path,
) -> crate::core::error::Result<u64> {
    let audio = backend.synthesize(text, voice, rate).await?;
    if audio.is_empty() {
        return Err(Error::Backend(BackendError::new(
            backend.provider(),
            format!("Synthesis with voice {} produced no audio", voice.voice_id),
        )));
    }
    write_file(output, &audio).await?;
    Ok(audio.len() as u64)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SpeechProviderConfig {
    Edge(EdgeTtsConfig),
    Openai(OpenAiTtsConfig),
}

impl Default for SpeechProviderConfig {
    fn default() -> Self {
        SpeechProviderConfig::Edge(EdgeTtsConfig::default())
    }
}

/// The closed set of speech providers this build knows about.
pub enum SpeechProvider {
    Edge(edge::EdgeTtsClient),
    Openai(openai::OpenAiTtsClient),
}

pub fn create_speech_backend(config: &SpeechProviderConfig) -> Result<SpeechProvider> {
    let provider = match config {
        SpeechProviderConfig::Edge(cfg) => SpeechProvider::Edge(edge::EdgeTtsClient::new(cfg.clone())),
        SpeechProviderConfig::Openai(cfg) => SpeechProvider::Openai(openai::OpenAiTtsClient::new(cfg.clone())?),
    };
    info!(
        "Initialized speech provider: {} ({} voices)",
        provider.provider(),
        provider.catalog().voices().len()
    );
    Ok(provider)
}

#[async_trait]
impl SpeechBackend for SpeechProvider {
    fn provider(&self) -> &str {
        match self {
            SpeechProvider::Edge(c) => c.provider(),
            SpeechProvider::Openai(c) => c.provider(),
        }
    }

    fn catalog(&self) -> &VoiceCatalog {
        match self {
            SpeechProvider::Edge(c) => c.catalog(),
            SpeechProvider::Openai(c) => c.catalog(),
        }
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        rate: SpeechRate,
    ) -> Result<Vec<u8>, BackendError> {
        match self {
            SpeechProvider::Edge(c) => c.synthesize(text, voice, rate).await,
            SpeechProvider::Openai(c) => c.synthesize(text, voice, rate).await,
        }
    }
}
