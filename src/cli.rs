use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, Select, Text};
use std::path::PathBuf;

use storycast::core::config::{Config, DEFAULT_CONFIG_PATH};
use storycast::core::state::{
    GenerationParams, SpeechRate, Stage, DEFAULT_GENRE, DEFAULT_STYLE, DEFAULT_TARGET_MINUTES,
};
use storycast::core::store::ListFilter;
use storycast::services::prompts::{genre_names, style_names};
use storycast::services::tts::VoiceProfile;
use storycast::services::workflow::StoryWorkflow;

/// Turn a one-line idea into a narrated, mastered audio story.
#[derive(Debug, Parser)]
#[command(name = "storycast", version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write, narrate and master a new story
    Generate(GenerateArgs),
    /// Show the status of a story
    Status { id: String },
    /// List stories, newest first
    List {
        /// Only stories marked for publication
        #[arg(long)]
        published: bool,
    },
    /// Print a story record with its text
    Show { id: String },
    /// Delete a story and its files
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Mark a story for publication
    Publish {
        id: String,
        /// Remove the mark instead
        #[arg(long)]
        off: bool,
    },
    /// List narrator voices
    Voices,
    /// Synthesize a short sample of a voice
    Preview { voice: String },
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Story idea
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Expanded instructions used for writing instead of the idea
    #[arg(long)]
    pub system_prompt: Option<String>,

    #[arg(short, long)]
    pub genre: Option<String>,

    /// Author whose style the story imitates
    #[arg(short, long)]
    pub style: Option<String>,

    /// Character to include (repeatable)
    #[arg(long = "character")]
    pub characters: Vec<String>,

    /// Target length in minutes
    #[arg(short, long)]
    pub minutes: Option<u32>,

    /// Voice key, see `storycast voices`
    #[arg(short, long)]
    pub voice: Option<String>,

    /// Speaking rate offset such as -5%
    #[arg(long, allow_hyphen_values = true)]
    pub rate: Option<SpeechRate>,

    /// Treat the prompt as free text with default genre, style and length
    #[arg(long)]
    pub free: bool,
}

pub async fn run(command: Command, workflow: &StoryWorkflow, config: &Config) -> Result<()> {
    match command {
        Command::Generate(args) => generate(args, workflow, config.unattended).await,
        Command::Status { id } => {
            let status = workflow.poll_status(&id).await?;
            println!(
                "{} [{}] {}% {}",
                status.title.as_deref().unwrap_or(&id),
                status.status,
                status.progress_pct,
                status.progress
            );
            Ok(())
        }
        Command::List { published } => {
            let filter = if published {
                ListFilter::published_only()
            } else {
                ListFilter::default()
            };
            let stories = workflow.list(filter).await;
            if stories.is_empty() {
                println!("No stories yet.");
            }
            for story in stories {
                let mark = if story.is_on_spotify { "*" } else { " " };
                println!(
                    "{}{}  {:<10} {}  {}",
                    mark,
                    story.id,
                    Stage::from(story.status).as_str(),
                    story.created_at.format("%Y-%m-%d %H:%M"),
                    story.title
                );
            }
            Ok(())
        }
        Command::Show { id } => {
            let details = workflow.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
            Ok(())
        }
        Command::Delete { id, yes } => {
            if !yes && !config.unattended {
                let confirmed = Confirm::new(&format!("Delete story {} and all its files?", id))
                    .with_default(false)
                    .prompt()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let removed = workflow.delete(&id).await?;
            if removed {
                println!("Deleted {}.", id);
            } else {
                println!("Deleted {} (no files on disk).", id);
            }
            Ok(())
        }
        Command::Publish { id, off } => {
            let enabled = workflow.set_publication_flag(&id, !off).await?;
            println!("{} {}", id, if enabled { "published" } else { "unpublished" });
            Ok(())
        }
        Command::Voices => {
            for voice in workflow.voices() {
                println!("{}", voice_label(voice));
            }
            Ok(())
        }
        Command::Preview { voice } => {
            let path = workflow.preview_voice(&voice).await?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn voice_label(voice: &VoiceProfile) -> String {
    format!(
        "{} ({}) - {}, {} {}",
        voice.key, voice.gender, voice.name, voice.accent, voice.style
    )
}

fn pick(prompt: &str, given: Option<String>, options: Vec<&str>, fallback: &str, unattended: bool) -> Result<String> {
    match given {
        Some(value) => Ok(value),
        None if unattended => Ok(fallback.to_string()),
        None => {
            let start = options.iter().position(|o| *o == fallback).unwrap_or(0);
            let choice = Select::new(prompt, options).with_starting_cursor(start).prompt()?;
            Ok(choice.to_string())
        }
    }
}

fn pick_voice(given: Option<String>, voices: &[VoiceProfile], unattended: bool) -> Result<Option<String>> {
    if given.is_some() || unattended || voices.is_empty() {
        return Ok(given);
    }
    let options: Vec<String> = voices.iter().map(voice_label).collect();
    let selection = Select::new("Narrator voice:", options).prompt()?;
    let key = selection
        .split_whitespace()
        .next()
        .context("Empty voice selection")?
        .to_string();
    Ok(Some(key))
}

fn build_params(args: GenerateArgs, voices: &[VoiceProfile], unattended: bool) -> Result<GenerationParams> {
    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None if unattended => bail!("--prompt is required in unattended mode"),
        None => Text::new("Story idea:").prompt()?,
    };

    let mut params = if args.free {
        GenerationParams::free_text(prompt)
    } else {
        let genre = pick("Genre:", args.genre, genre_names(), DEFAULT_GENRE, unattended)?;
        let style = pick("Writing style:", args.style, style_names(), DEFAULT_STYLE, unattended)?;
        let target_minutes = match args.minutes {
            Some(minutes) => minutes,
            None if unattended => DEFAULT_TARGET_MINUTES,
            None => CustomType::<u32>::new("Length in minutes:")
                .with_default(DEFAULT_TARGET_MINUTES)
                .prompt()?,
        };
        GenerationParams {
            genre,
            style,
            target_minutes,
            characters: args.characters,
            ..GenerationParams::new(prompt)
        }
    };

    params.system_prompt = args.system_prompt;
    params.voice_key = pick_voice(args.voice, voices, unattended || args.free)?;
    if let Some(rate) = args.rate {
        params.speech_rate = rate;
    }
    Ok(params)
}

async fn generate(args: GenerateArgs, workflow: &StoryWorkflow, unattended: bool) -> Result<()> {
    let params = build_params(args, workflow.voices(), unattended)?;
    let handle = workflow.start(params).await?;
    let story_id = handle.story_id().to_string();
    println!("Started story {}", story_id);

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut updates = handle.subscribe();
    loop {
        {
            let status = updates.borrow_and_update();
            pb.set_position(u64::from(status.progress_pct));
            pb.set_message(status.progress.clone());
            if status.status.is_terminal() {
                break;
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }

    let status = handle.wait().await?;
    if status.status == Stage::Error {
        pb.abandon_with_message(status.progress.clone());
        bail!("Story {} failed: {}", story_id, status.progress);
    }
    pb.finish_with_message("Done");

    let details = workflow.get(&story_id).await?;
    let meta = details.meta;
    println!("{} ({})", meta.title, story_id);
    if let Some(duration) = meta.duration_seconds {
        println!("  {:.0} min {:02.0} s", (duration / 60.0).floor(), duration % 60.0);
    }
    println!("  {}", workflow.dirs().story(&story_id).final_audio().display());
    if let Some(url) = meta.image_url {
        println!("  cover: {}", url);
    }
    Ok(())
}
