use crate::core::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_GENRE: &str = "Realism";
pub const DEFAULT_STYLE: &str = "Douglas Adams";
pub const DEFAULT_TARGET_MINUTES: u32 = 20;
pub const MAX_TARGET_MINUTES: u32 = 90;

/// Durable lifecycle of a story record. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Generating,
    Done,
    Error,
}

impl StoryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StoryStatus::Generating)
    }
}

/// Fine-grained stage of a live run, as reported to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    GeneratingText,
    GeneratingAudio,
    Processing,
    Done,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Starting => "starting",
            Stage::GeneratingText => "generating_text",
            Stage::GeneratingAudio => "generating_audio",
            Stage::Processing => "processing",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StoryStatus> for Stage {
    fn from(status: StoryStatus) -> Self {
        match status {
            StoryStatus::Generating => Stage::Starting,
            StoryStatus::Done => Stage::Done,
            StoryStatus::Error => Stage::Error,
        }
    }
}

/// Ephemeral per-run status served to pollers. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStatus {
    pub status: Stage,
    pub progress: String,
    pub progress_pct: u8,
    pub title: Option<String>,
}

impl GenerationStatus {
    pub fn starting() -> Self {
        Self {
            status: Stage::Starting,
            progress: "Starting generation...".to_string(),
            progress_pct: 0,
            title: None,
        }
    }
}

/// One unit of narrative text; maps to exactly one audio chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub title: String,
    pub text: String,
}

/// The text artifact of a story, persisted as `story.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryText {
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(alias = "chapters")]
    pub segments: Vec<Segment>,
}

impl StoryText {
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn word_count(&self) -> u32 {
        crate::utils::text::word_count(&self.full_text()) as u32
    }
}

/// Speaking-rate offset in percent, e.g. `-5%`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpeechRate(i32);

impl SpeechRate {
    pub fn percent(pct: i32) -> Self {
        Self(pct.clamp(-50, 100))
    }

    pub fn as_percent(self) -> i32 {
        self.0
    }

    /// Multiplier form used by providers that take a speed factor.
    pub fn as_speed(self) -> f64 {
        1.0 + f64::from(self.0) / 100.0
    }
}

impl fmt::Display for SpeechRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}%", self.0)
    }
}

impl FromStr for SpeechRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_end_matches('%').trim();
        trimmed
            .parse::<i32>()
            .map(SpeechRate::percent)
            .map_err(|_| Error::InvalidInput(format!("Invalid speech rate: {:?}", s)))
    }
}

impl TryFrom<String> for SpeechRate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SpeechRate> for String {
    fn from(rate: SpeechRate) -> Self {
        rate.to_string()
    }
}

/// Everything a caller supplies to start one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    /// Overrides `prompt` for generation; `prompt` is still what gets stored.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default = "default_target_minutes")]
    pub target_minutes: u32,
    #[serde(default)]
    pub voice_key: Option<String>,
    #[serde(default = "default_speech_rate")]
    pub speech_rate: SpeechRate,
}

fn default_genre() -> String {
    DEFAULT_GENRE.to_string()
}
fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}
fn default_target_minutes() -> u32 {
    DEFAULT_TARGET_MINUTES
}
fn default_speech_rate() -> SpeechRate {
    SpeechRate::percent(-5)
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            genre: default_genre(),
            style: default_style(),
            characters: Vec::new(),
            target_minutes: default_target_minutes(),
            voice_key: None,
            speech_rate: default_speech_rate(),
        }
    }

    /// Free-text request: the text is both the prompt and the stored idea.
    pub fn free_text(text: impl Into<String>) -> Self {
        Self::new(text)
    }

    pub fn generation_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.prompt)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("Prompt must not be empty".to_string()));
        }
        if self.target_minutes == 0 || self.target_minutes > MAX_TARGET_MINUTES {
            return Err(Error::InvalidInput(format!(
                "target_minutes must be between 1 and {}",
                MAX_TARGET_MINUTES
            )));
        }
        Ok(())
    }
}

/// One record per generated episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMeta {
    pub id: String,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub genre: String,
    pub style: String,
    pub voice_key: String,
    pub voice_name: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub chapter_count: Option<u32>,
    #[serde(default)]
    pub word_count: Option<u32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_on_spotify: bool,
    pub status: StoryStatus,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub progress_pct: u8,
    pub created_at: DateTime<Utc>,
}

impl StoryMeta {
    /// Fresh record in `generating` state with placeholder title/description.
    pub fn generating(id: &str, params: &GenerationParams, voice_key: &str, voice_name: &str) -> Self {
        let idea: String = params.prompt.chars().take(100).collect();
        Self {
            id: id.to_string(),
            title: format!(
                "Writing '{}' story ({} min)...",
                params.style, params.target_minutes
            ),
            description: format!("Idea: {}...", idea),
            prompt: params.prompt.clone(),
            genre: params.genre.clone(),
            style: params.style.clone(),
            voice_key: voice_key.to_string(),
            voice_name: voice_name.to_string(),
            duration_seconds: None,
            chapter_count: None,
            word_count: None,
            image_url: None,
            is_on_spotify: false,
            status: StoryStatus::Generating,
            progress: GenerationStatus::starting().progress,
            progress_pct: 0,
            created_at: Utc::now(),
        }
    }

    /// Records an intermediate progress message. No-op once terminal.
    pub fn record_progress(&mut self, message: &str, pct: Option<u8>) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = message.to_string();
        if let Some(pct) = pct {
            self.progress_pct = pct;
        }
    }

    /// Transitions to `done`, filling the completion fields together.
    pub fn mark_done(&mut self, duration_seconds: f64, chapter_count: u32, word_count: u32, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.duration_seconds = Some(duration_seconds);
        self.chapter_count = Some(chapter_count);
        self.word_count = Some(word_count);
        self.status = StoryStatus::Done;
        self.progress = message.to_string();
        self.progress_pct = 100;
    }

    /// Transitions to `error`, keeping whatever partial fields were filled.
    pub fn mark_error(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = StoryStatus::Error;
        self.progress = message.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_rate_parsing() {
        assert_eq!("-5%".parse::<SpeechRate>().unwrap().as_percent(), -5);
        assert_eq!("+10%".parse::<SpeechRate>().unwrap().as_percent(), 10);
        assert_eq!(" 0 ".parse::<SpeechRate>().unwrap().as_percent(), 0);
        assert!("fast".parse::<SpeechRate>().is_err());

        assert_eq!(SpeechRate::percent(-5).to_string(), "-5%");
        assert_eq!(SpeechRate::percent(0).to_string(), "+0%");
        assert!((SpeechRate::percent(-5).as_speed() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_speech_rate_serde_as_string() {
        let json = serde_json::to_string(&SpeechRate::percent(-5)).unwrap();
        assert_eq!(json, "\"-5%\"");
        let back: SpeechRate = serde_json::from_str("\"+20%\"").unwrap();
        assert_eq!(back.as_percent(), 20);
    }

    #[test]
    fn test_params_validation() {
        assert!(GenerationParams::new("a toaster gains sentience").validate().is_ok());
        assert!(matches!(
            GenerationParams::new("   ").validate(),
            Err(Error::InvalidInput(_))
        ));
        let mut params = GenerationParams::new("x");
        params.target_minutes = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_generation_prompt_prefers_system_prompt() {
        let mut params = GenerationParams::new("user idea");
        assert_eq!(params.generation_prompt(), "user idea");
        params.system_prompt = Some("expanded idea".to_string());
        assert_eq!(params.generation_prompt(), "expanded idea");
        params.system_prompt = Some("  ".to_string());
        assert_eq!(params.generation_prompt(), "user idea");
    }

    #[test]
    fn test_terminal_status_does_not_revert() {
        let params = GenerationParams::new("idea");
        let mut meta = StoryMeta::generating("abc12345", &params, "aria", "Aria");
        assert_eq!(meta.duration_seconds, None);

        meta.mark_error("Error: speech failed");
        assert_eq!(meta.status, StoryStatus::Error);

        meta.mark_done(12.0, 1, 100, "Done");
        meta.record_progress("late progress", Some(50));
        assert_eq!(meta.status, StoryStatus::Error);
        assert_eq!(meta.progress, "Error: speech failed");
        assert_eq!(meta.duration_seconds, None);
        assert_eq!(meta.chapter_count, None);
    }

    #[test]
    fn test_mark_done_fills_completion_fields() {
        let params = GenerationParams::new("idea");
        let mut meta = StoryMeta::generating("abc12345", &params, "aria", "Aria");
        meta.mark_done(301.5, 3, 4500, "Done");
        assert_eq!(meta.status, StoryStatus::Done);
        assert_eq!(meta.duration_seconds, Some(301.5));
        assert_eq!(meta.chapter_count, Some(3));
        assert_eq!(meta.word_count, Some(4500));
        assert_eq!(meta.progress_pct, 100);
    }

    #[test]
    fn test_story_text_accepts_legacy_chapters_key() {
        let json = r#"{"title": "T", "synopsis": "S", "chapters": [{"title": "A", "text": "one two"}]}"#;
        let text: StoryText = serde_json::from_str(json).unwrap();
        assert_eq!(text.segments.len(), 1);
        assert_eq!(text.word_count(), 2);
    }
}
