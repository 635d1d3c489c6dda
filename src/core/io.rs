use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::Result;

pub const STORE_FILE: &str = "stories.json";

/// Root of everything the pipeline writes. Each story gets its own
/// subdirectory so concurrent runs never touch each other's files.
#[derive(Debug, Clone)]
pub struct StoryDirs {
    root: PathBuf,
}

impl StoryDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn store_file(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn preview_file(&self, voice_key: &str) -> PathBuf {
        self.root.join("previews").join(format!("{}.mp3", voice_key))
    }

    pub fn story(&self, story_id: &str) -> StoryPaths {
        StoryPaths {
            dir: self.root.join(story_id),
        }
    }
}

/// Positional file names inside one story directory.
#[derive(Debug, Clone)]
pub struct StoryPaths {
    dir: PathBuf,
}

impl StoryPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn text_file(&self) -> PathBuf {
        self.dir.join("story.json")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.dir.join("chunks")
    }

    /// Chunk for the zero-based segment `index`; names are 1-based.
    pub fn segment_chunk(&self, index: usize) -> PathBuf {
        self.chunks_dir().join(format!("segment_{:02}.mp3", index + 1))
    }

    pub fn title_chunk(&self) -> PathBuf {
        self.chunks_dir().join("title.mp3")
    }

    pub fn final_audio(&self) -> PathBuf {
        self.dir.join("story.mp3")
    }

    pub fn cover_image(&self) -> PathBuf {
        self.dir.join("cover.png")
    }
}

pub async fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, content).await
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_file(path, content.as_bytes()).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Removes a file or a whole directory tree. Returns whether anything existed.
pub async fn remove_path(path: &Path) -> io::Result<bool> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    if path.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}

/// True when `path` exists and holds at least one byte.
pub async fn is_non_empty_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
