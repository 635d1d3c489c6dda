use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::content::StoryConfig;
use crate::services::image::ImageProviderConfig;
use crate::services::llm::LlmConfig;
use crate::services::tts::SpeechProviderConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub intro_music: Option<PathBuf>,

    #[serde(default)]
    pub outro_music: Option<PathBuf>,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub speech: SpeechProviderConfig,

    #[serde(default)]
    pub image: ImageProviderConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_fadeout_ms")]
    pub fadeout_ms: u64,
    #[serde(default)]
    pub loudness: LoudnessTarget,
}

/// EBU R128 normalisation target used by the mastering pass.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LoudnessTarget {
    #[serde(default = "default_integrated")]
    pub integrated: f64,
    #[serde(default = "default_true_peak")]
    pub true_peak: f64,
    #[serde(default = "default_lra")]
    pub lra: f64,
}

/// Upper bounds for every slow call a run makes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_content_secs")]
    pub content_secs: u64,
    #[serde(default = "default_speech_secs")]
    pub speech_secs: u64,
    #[serde(default = "default_image_secs")]
    pub image_secs: u64,
    #[serde(default = "default_media_secs")]
    pub media_secs: u64,
}

fn default_output() -> String {
    "audio_output".to_string()
}
fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}
fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}
fn default_silence_ms() -> u64 {
    2500
}
fn default_fadeout_ms() -> u64 {
    3000
}
fn default_integrated() -> f64 {
    -16.0
}
fn default_true_peak() -> f64 {
    -1.5
}
fn default_lra() -> f64 {
    11.0
}
fn default_content_secs() -> u64 {
    600
}
fn default_speech_secs() -> u64 {
    300
}
fn default_image_secs() -> u64 {
    120
}
fn default_media_secs() -> u64 {
    600
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            silence_ms: default_silence_ms(),
            fadeout_ms: default_fadeout_ms(),
            loudness: LoudnessTarget::default(),
        }
    }
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated: default_integrated(),
            true_peak: default_true_peak(),
            lra: default_lra(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            content_secs: default_content_secs(),
            speech_secs: default_speech_secs(),
            image_secs: default_image_secs(),
            media_secs: default_media_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn content(&self) -> Duration {
        Duration::from_secs(self.content_secs)
    }
    pub fn speech(&self) -> Duration {
        Duration::from_secs(self.speech_secs)
    }
    pub fn image(&self) -> Duration {
        Duration::from_secs(self.image_secs)
    }
    pub fn media(&self) -> Duration {
        Duration::from_secs(self.media_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            base_url: default_base_url(),
            intro_music: None,
            outro_music: None,
            unattended: false,
            llm: LlmConfig::default(),
            story: StoryConfig::default(),
            speech: SpeechProviderConfig::default(),
            image: ImageProviderConfig::default(),
            audio: AudioConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("{} not found, using default configuration", path.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_folder)
    }
}

/// Picks the configured key, falling back to the named environment variable.
pub fn resolve_api_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}
