use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::core::config::{AudioConfig, LoudnessTarget};
use crate::core::error::{Error, Result};
use crate::core::io::write_file;
use crate::utils::media::{concat_list, MediaTool};

/// Optional material around the spoken segments.
#[derive(Debug, Clone)]
pub struct MergeExtras {
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
    pub title_clip: Option<PathBuf>,
    pub silence_ms: u64,
    pub fadeout_ms: u64,
}

impl Default for MergeExtras {
    fn default() -> Self {
        Self {
            intro: None,
            outro: None,
            title_clip: None,
            silence_ms: 2500,
            fadeout_ms: 3000,
        }
    }
}

#[async_trait]
pub trait AudioAssembler: Send + Sync {
    /// Merges `segments` in order into `output` and returns its duration in seconds.
    async fn merge(&self, segments: &[PathBuf], output: &Path, extras: &MergeExtras) -> Result<f64>;
}

/// Extras that actually exist on disk. Anything missing is left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentExtras {
    pub intro: Option<PathBuf>,
    pub title_clip: Option<PathBuf>,
    pub outro: Option<PathBuf>,
}

impl PresentExtras {
    pub fn check(extras: &MergeExtras) -> Self {
        let keep = |p: &Option<PathBuf>| p.as_ref().filter(|p| p.is_file()).cloned();
        Self {
            intro: keep(&extras.intro),
            title_clip: keep(&extras.title_clip),
            outro: keep(&extras.outro),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intro.is_none() && self.title_clip.is_none() && self.outro.is_none()
    }
}

/// Play order with one shared `silence` clip between adjacent items:
/// `[intro, gap]? [title, gap]? seg (gap seg)* [gap, outro]?`.
pub fn build_playlist(segments: &[PathBuf], extras: &PresentExtras, silence: &Path) -> Vec<PathBuf> {
    let mut playlist = Vec::with_capacity(segments.len() * 2 + 4);
    for lead in [&extras.intro, &extras.title_clip].into_iter().flatten() {
        playlist.push(lead.clone());
        playlist.push(silence.to_path_buf());
    }
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            playlist.push(silence.to_path_buf());
        }
        playlist.push(segment.clone());
    }
    if let Some(outro) = &extras.outro {
        playlist.push(silence.to_path_buf());
        playlist.push(outro.clone());
    }
    playlist
}

/// ffmpeg-backed assembler: concat demuxer for joining, then one
/// loudness + fade mastering pass.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    media: MediaTool,
    loudness: LoudnessTarget,
}

impl FfmpegAssembler {
    pub fn new(media: MediaTool, loudness: LoudnessTarget) -> Self {
        Self { media, loudness }
    }

    pub fn from_config(audio: &AudioConfig, media: MediaTool) -> Self {
        Self::new(media, audio.loudness)
    }
}

#[async_trait]
impl AudioAssembler for FfmpegAssembler {
    async fn merge(&self, segments: &[PathBuf], output: &Path, extras: &MergeExtras) -> Result<f64> {
        if segments.is_empty() {
            return Err(Error::InvalidInput("No audio segments to merge".to_string()));
        }
        let present = PresentExtras::check(extras);
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        if segments.len() == 1 && present.is_empty() {
            info!("Single segment without extras, mastering directly");
            self.media
                .master(&segments[0], output, extras.fadeout_ms, &self.loudness)
                .await?;
        } else {
            let work = tempfile::Builder::new().prefix(".merge-").tempdir_in(parent)?;
            let silence = work.path().join("silence.mp3");
            self.media.generate_silence(extras.silence_ms, &silence).await?;

            // The concat demuxer needs every input in the speech chunk format.
            let mut conformed = present.clone();
            for (name, slot) in [("intro", &mut conformed.intro), ("outro", &mut conformed.outro)] {
                if let Some(source) = slot.take() {
                    let target = work.path().join(format!("{}.mp3", name));
                    self.media.conform(&source, &target).await?;
                    *slot = Some(target);
                }
            }

            let playlist = build_playlist(segments, &conformed, &silence);
            debug!("Merging {} playlist items", playlist.len());

            let list_file = work.path().join("concat.txt");
            write_file(&list_file, concat_list(&playlist)?.as_bytes()).await?;
            let joined = work.path().join("joined.mp3");
            self.media.concat(&list_file, &joined).await?;

            self.media
                .master(&joined, output, extras.fadeout_ms, &self.loudness)
                .await?;
        }

        let duration = self.media.probe_duration(output).await?;
        info!("Mastered {} ({:.1}s)", output.display(), duration);
        Ok(duration)
    }
}
