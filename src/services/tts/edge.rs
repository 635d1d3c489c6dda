use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use super::{SpeechBackend, VoiceCatalog, VoiceProfile};
use crate::core::error::BackendError;
use crate::core::state::SpeechRate;
use crate::utils::text::{escape_xml, split_for_synthesis};

const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EdgeTtsConfig {
    #[serde(default = "default_voice", alias = "voice")]
    pub default_voice: String,
    /// Replaces the built-in catalogue when non-empty.
    #[serde(default)]
    pub voices: Vec<VoiceProfile>,
    #[serde(default = "default_xml_lang")]
    pub xml_lang: String,
    /// Longer texts are split and synthesized piecewise.
    #[serde(default = "default_max_chars")]
    pub max_chars_per_request: usize,
}

fn default_voice() -> String {
    "aria".to_string()
}
fn default_xml_lang() -> String {
    "en-US".to_string()
}
fn default_max_chars() -> usize {
    3000
}

impl Default for EdgeTtsConfig {
    fn default() -> Self {
        Self {
            default_voice: default_voice(),
            voices: Vec::new(),
            xml_lang: default_xml_lang(),
            max_chars_per_request: default_max_chars(),
        }
    }
}

pub fn builtin_voices() -> Vec<VoiceProfile> {
    vec![
        VoiceProfile::new("aria", "Aria", "female", "en-US-AriaNeural", "US", "Standard"),
        VoiceProfile::new("jenny", "Jenny", "female", "en-US-JennyNeural", "US", "Standard"),
        VoiceProfile::new("ava", "Ava", "female", "en-US-AvaMultilingualNeural", "US", "Multilingual"),
        VoiceProfile::new("guy", "Guy", "male", "en-US-GuyNeural", "US", "Standard"),
        VoiceProfile::new("andrew", "Andrew", "male", "en-US-AndrewMultilingualNeural", "US", "Multilingual"),
        VoiceProfile::new("sonia", "Sonia", "female", "en-GB-SoniaNeural", "GB", "British"),
        VoiceProfile::new("ryan", "Ryan", "male", "en-GB-RyanNeural", "GB", "British"),
        VoiceProfile::new("natasha", "Natasha", "female", "en-AU-NatashaNeural", "AU", "Australian"),
        VoiceProfile::new("william", "William", "male", "en-AU-WilliamNeural", "AU", "Australian"),
        VoiceProfile::new("emily", "Emily", "female", "en-IE-EmilyNeural", "IE", "Irish"),
    ]
}

// --- Edge TTS Client ---

pub struct EdgeTtsClient {
    config: EdgeTtsConfig,
    catalog: VoiceCatalog,
}

impl EdgeTtsClient {
    pub fn new(config: EdgeTtsConfig) -> Self {
        let voices = if config.voices.is_empty() {
            builtin_voices()
        } else {
            config.voices.clone()
        };
        let catalog = VoiceCatalog::new(voices, config.default_voice.clone());
        Self { config, catalog }
    }

    fn ssml(&self, text: &str, voice: &VoiceProfile, rate: SpeechRate) -> String {
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'><voice name='{}'><prosody rate='{}'>{}</prosody></voice></speak>",
            self.config.xml_lang,
            voice.voice_id,
            rate,
            escape_xml(text)
        )
    }
}

#[async_trait]
impl SpeechBackend for EdgeTtsClient {
    fn provider(&self) -> &str {
        "edge"
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
        let pieces = split_for_synthesis(text, self.config.max_chars_per_request);
        debug!(
            "Edge TTS: {} chars in {} request(s) with {}",
            text.chars().count(),
            pieces.len(),
            voice.voice_id
        );

        // MP3 frames concatenate cleanly, so the pieces join byte for byte.
        let mut audio = Vec::new();
        for piece in pieces {
            let ssml = self.ssml(&piece, voice, rate);
            let bytes = tokio::task::spawn_blocking(move || {
                edge_tts::request_audio(&ssml, OUTPUT_FORMAT)
                    .map_err(|e| BackendError::new("edge", format!("Edge TTS crate error: {:?}", e)))
            })
            .await
            .map_err(|e| BackendError::new("edge", format!("Edge TTS task failed: {}", e)))??;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }
}
