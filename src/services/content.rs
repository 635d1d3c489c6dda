use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::error::BackendError;
use crate::core::state::{GenerationParams, Segment, StoryText};
use crate::services::llm::{ChatOptions, LlmClient, LlmConfig};
use crate::services::prompts::{self, PromptContext};
use crate::utils::text::{strip_code_blocks, trailing_context};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoryConfig {
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,
    /// Requests longer than this are written outline-first, part by part.
    #[serde(default = "default_single_pass_max_minutes")]
    pub single_pass_max_minutes: u32,
    #[serde(default = "default_minutes_per_segment")]
    pub minutes_per_segment: u32,
    #[serde(default = "default_context_window_chars")]
    pub context_window_chars: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_words_per_minute() -> u32 {
    150
}
fn default_single_pass_max_minutes() -> u32 {
    20
}
fn default_minutes_per_segment() -> u32 {
    10
}
fn default_context_window_chars() -> usize {
    2000
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_language() -> String {
    "English".to_string()
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            words_per_minute: default_words_per_minute(),
            single_pass_max_minutes: default_single_pass_max_minutes(),
            minutes_per_segment: default_minutes_per_segment(),
            context_window_chars: default_context_window_chars(),
            max_output_tokens: default_max_output_tokens(),
            language: default_language(),
        }
    }
}

const MIN_SEGMENTS: usize = 2;
const MAX_SEGMENTS: usize = 12;

/// What the content backend is asked to write.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub prompt: String,
    pub genre: String,
    pub style: String,
    pub characters: Vec<String>,
    pub target_minutes: u32,
}

impl ContentRequest {
    pub fn from_params(params: &GenerationParams) -> Self {
        Self {
            prompt: params.generation_prompt().to_string(),
            genre: params.genre.clone(),
            style: params.style.clone(),
            characters: params.characters.clone(),
            target_minutes: params.target_minutes,
        }
    }
}

#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Writes a whole story. `on_progress` receives human-readable updates
    /// while long generations are underway.
    async fn generate(
        &self,
        request: &ContentRequest,
        on_progress: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<StoryText, BackendError>;
}

#[derive(Deserialize)]
struct SinglePassReply {
    #[serde(default)]
    title: String,
    #[serde(default)]
    synopsis: String,
    #[serde(default)]
    full_text: String,
}

#[derive(Deserialize)]
struct OutlineReply {
    #[serde(default)]
    title: String,
    #[serde(default)]
    synopsis: String,
    #[serde(default, alias = "chapters")]
    segments: Vec<OutlineSegment>,
}

#[derive(Deserialize)]
struct OutlineSegment {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "summary")]
    brief: String,
}

/// LLM-backed story writer with a single-pass and an outline-first strategy.
#[derive(Debug)]
pub struct StoryWriter {
    llm: Box<dyn LlmClient>,
    config: StoryConfig,
    temperature: f32,
    retry_count: usize,
    retry_delay: Duration,
}

impl StoryWriter {
    pub fn new(llm: Box<dyn LlmClient>, config: StoryConfig, llm_config: &LlmConfig) -> Self {
        Self {
            llm,
            config,
            temperature: llm_config.temperature,
            retry_count: llm_config.retry_count,
            retry_delay: Duration::from_secs(llm_config.retry_delay_seconds),
        }
    }

    pub fn target_words(&self, minutes: u32) -> u32 {
        minutes * self.config.words_per_minute
    }

    pub fn segment_count(&self, minutes: u32) -> usize {
        let per = self.config.minutes_per_segment.max(1);
        (minutes.div_ceil(per) as usize).clamp(MIN_SEGMENTS, MAX_SEGMENTS)
    }

    fn error(&self, message: impl std::fmt::Display) -> BackendError {
        BackendError::new(self.llm.provider(), message)
    }

    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String, BackendError> {
        let mut attempt = 0;
        loop {
            match self.llm.chat(system, user, options).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    warn!(
                        "LLM call failed ({:#}), retrying in {}s ({}/{})",
                        e,
                        self.retry_delay.as_secs(),
                        attempt,
                        self.retry_count
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(BackendError::from_anyhow(self.llm.provider(), e)),
            }
        }
    }

    fn options(&self, json: bool) -> ChatOptions {
        let options = if json { ChatOptions::json() } else { ChatOptions::default() };
        options
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.config.max_output_tokens)
    }

    async fn single_pass(
        &self,
        ctx: &PromptContext<'_>,
        request: &ContentRequest,
        on_progress: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<StoryText, BackendError> {
        on_progress(&format!(
            "Writing '{}' story ({} min)...",
            request.style, request.target_minutes
        ));
        let prompt = prompts::single_pass_prompt(ctx, request.target_minutes, self.target_words(request.target_minutes));
        let reply = self
            .chat(&prompts::system_prompt(ctx.language), &prompt, &self.options(true))
            .await?;

        let parsed: SinglePassReply = serde_json::from_str(&strip_code_blocks(&reply))
            .map_err(|e| self.error(format!("Malformed story JSON: {}", e)))?;
        let text = parsed.full_text.trim();
        if text.is_empty() {
            return Err(self.error("Story response contained no text"));
        }

        Ok(StoryText {
            title: non_empty_or(parsed.title, "Untitled Story"),
            synopsis: parsed.synopsis.trim().to_string(),
            segments: vec![Segment {
                title: "The Story".to_string(),
                text: text.to_string(),
            }],
        })
    }

    async fn outline(&self, ctx: &PromptContext<'_>, request: &ContentRequest, count: usize) -> Result<OutlineReply, BackendError> {
        let prompt = prompts::outline_prompt(ctx, request.target_minutes, count);
        let reply = self
            .chat(&prompts::system_prompt(ctx.language), &prompt, &self.options(true))
            .await?;
        let outline: OutlineReply = serde_json::from_str(&strip_code_blocks(&reply))
            .map_err(|e| self.error(format!("Malformed outline JSON: {}", e)))?;
        if outline.segments.is_empty() {
            return Err(self.error("Outline contained no segments"));
        }
        Ok(outline)
    }

    async fn segmented(
        &self,
        ctx: &PromptContext<'_>,
        request: &ContentRequest,
        on_progress: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<StoryText, BackendError> {
        let count = self.segment_count(request.target_minutes);
        on_progress(&format!("Outlining story in {} parts...", count));

        let outline = match self.outline(ctx, request, count).await {
            Ok(outline) => outline,
            Err(e) => {
                warn!("Outline failed ({}), falling back to single-pass", e);
                return self.single_pass(ctx, request, on_progress).await;
            }
        };

        let title = non_empty_or(outline.title, "Untitled Story");
        let synopsis = outline.synopsis.trim().to_string();
        let total = outline.segments.len();
        let words_per_segment = (self.target_words(request.target_minutes) as usize / total).max(1) as u32;
        let system = prompts::system_prompt(ctx.language);

        let mut written = String::new();
        let mut segments = Vec::with_capacity(total);
        for (i, planned) in outline.segments.into_iter().enumerate() {
            let segment_title = non_empty_or(planned.title, &format!("Part {}", i + 1));
            on_progress(&format!("Writing part {} of {}: {}", i + 1, total, segment_title));

            let tail = trailing_context(&written, self.config.context_window_chars);
            let prompt = prompts::segment_prompt(
                ctx,
                &title,
                &synopsis,
                i,
                total,
                &segment_title,
                planned.brief.trim(),
                words_per_segment,
                tail,
            );
            let reply = self.chat(&system, &prompt, &self.options(false)).await?;
            let text = strip_code_blocks(&reply).trim().to_string();
            if text.is_empty() {
                return Err(self.error(format!("Part {} of {} came back empty", i + 1, total)));
            }

            if !written.is_empty() {
                written.push_str("\n\n");
            }
            written.push_str(&text);
            segments.push(Segment {
                title: segment_title,
                text,
            });
        }

        Ok(StoryText {
            title,
            synopsis,
            segments,
        })
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl ContentBackend for StoryWriter {
    async fn generate(
        &self,
        request: &ContentRequest,
        on_progress: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<StoryText, BackendError> {
        let ctx = PromptContext {
            idea: &request.prompt,
            genre: &request.genre,
            style: &request.style,
            characters: &request.characters,
            language: &self.config.language,
        };

        let story = if request.target_minutes > self.config.single_pass_max_minutes {
            info!(
                "Writing {} min story in segmented mode ({} words)",
                request.target_minutes,
                self.target_words(request.target_minutes)
            );
            self.segmented(&ctx, request, on_progress).await?
        } else {
            info!(
                "Writing {} min story in a single pass ({} words)",
                request.target_minutes,
                self.target_words(request.target_minutes)
            );
            self.single_pass(&ctx, request, on_progress).await?
        };

        info!(
            "Story '{}' written: {} segment(s), {} words",
            story.title,
            story.segments.len(),
            story.word_count()
        );
        Ok(story)
    }
}
