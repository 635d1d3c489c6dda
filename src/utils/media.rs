use log::debug;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::core::config::{AudioConfig, LoudnessTarget};
use crate::core::error::{Error, Result};

const STDERR_TAIL_CHARS: usize = 800;
/// Speech providers deliver 24 kHz mono; everything joined must match.
pub const SAMPLE_RATE: u32 = 24_000;

/// Thin async wrapper over the `ffmpeg` / `ffprobe` binaries. Every call
/// runs as a child process under a deadline and is killed if it overruns.
#[derive(Debug, Clone)]
pub struct MediaTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl MediaTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    pub fn from_config(audio: &AudioConfig, timeout: Duration) -> Self {
        Self::new(&audio.ffmpeg, &audio.ffprobe, timeout)
    }

    /// Whether both binaries can be spawned.
    pub async fn is_available(&self) -> bool {
        for bin in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(bin)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if !matches!(status, Ok(s) if s.success()) {
                return false;
            }
        }
        true
    }

    async fn run(&self, program: &Path, args: Vec<OsString>) -> Result<Vec<u8>> {
        let tool = program.display().to_string();
        debug!("Running {} {:?}", tool, args);

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::MediaTool {
                tool: tool.clone(),
                status: "spawn failure".to_string(),
                stderr: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: tool,
                    after: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::MediaTool {
                tool,
                status: output.status.to_string(),
                stderr: tail(stderr.trim(), STDERR_TAIL_CHARS).to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn ffmpeg(&self, args: Vec<OsString>) -> Result<()> {
        let mut full: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
        full.extend(args);
        self.run(&self.ffmpeg, full).await.map(|_| ())
    }

    /// Container-reported duration in seconds.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let stdout = self
            .run(
                &self.ffprobe,
                vec![
                    "-v".into(),
                    "error".into(),
                    "-show_entries".into(),
                    "format=duration".into(),
                    "-of".into(),
                    "default=noprint_wrappers=1:nokey=1".into(),
                    path.into(),
                ],
            )
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        text.trim().parse::<f64>().map_err(|_| Error::MediaTool {
            tool: self.ffprobe.display().to_string(),
            status: "unparsable duration".to_string(),
            stderr: format!("{:?} for {}", text.trim(), path.display()),
        })
    }

    /// Mono 24 kHz MP3 of silence, matching the speech chunks' format.
    pub async fn generate_silence(&self, duration_ms: u64, output: &Path) -> Result<()> {
        self.ffmpeg(vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("anullsrc=r={}:cl=mono", SAMPLE_RATE).into(),
            "-t".into(),
            format_seconds(duration_ms).into(),
            "-c:a".into(),
            "libmp3lame".into(),
            "-q:a".into(),
            "5".into(),
            output.into(),
        ])
        .await
    }

    /// Re-encodes arbitrary audio (e.g. stereo music) to the speech chunk format.
    pub async fn conform(&self, input: &Path, output: &Path) -> Result<()> {
        self.ffmpeg(vec![
            "-i".into(),
            input.into(),
            "-vn".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string().into(),
            "-ac".into(),
            "1".into(),
            "-c:a".into(),
            "libmp3lame".into(),
            "-q:a".into(),
            "2".into(),
            output.into(),
        ])
        .await
    }

    /// Stream-copies every file listed in a concat-demuxer list.
    pub async fn concat(&self, list_file: &Path, output: &Path) -> Result<()> {
        self.ffmpeg(vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_file.into(),
            "-c".into(),
            "copy".into(),
            output.into(),
        ])
        .await
    }

    /// Loudness normalisation plus a fade-out over the last `fadeout_ms`.
    pub async fn master(
        &self,
        input: &Path,
        output: &Path,
        fadeout_ms: u64,
        loudness: &LoudnessTarget,
    ) -> Result<()> {
        let duration = self.probe_duration(input).await?;
        self.ffmpeg(vec![
            "-i".into(),
            input.into(),
            "-af".into(),
            mastering_filter(duration, fadeout_ms, loudness).into(),
            "-ar".into(),
            SAMPLE_RATE.to_string().into(),
            "-c:a".into(),
            "libmp3lame".into(),
            "-q:a".into(),
            "2".into(),
            output.into(),
        ])
        .await
    }
}

pub fn mastering_filter(duration_secs: f64, fadeout_ms: u64, loudness: &LoudnessTarget) -> String {
    let fade_secs = fadeout_ms as f64 / 1000.0;
    let fade_start = (duration_secs - fade_secs).max(0.0);
    format!(
        "loudnorm=I={}:TP={}:LRA={},afade=t=out:st={:.3}:d={:.3}",
        loudness.integrated, loudness.true_peak, loudness.lra, fade_start, fade_secs
    )
}

/// One `file '...'` line per entry, quoting per the concat demuxer rules.
/// Entries are written absolute: the demuxer resolves relative ones
/// against the list file's own directory, not the working directory.
pub fn concat_list(files: &[PathBuf]) -> io::Result<String> {
    let mut lines = Vec::with_capacity(files.len());
    for file in files {
        let path = std::path::absolute(file)?;
        lines.push(format!(
            "file '{}'",
            path.display().to_string().replace('\'', r"'\''")
        ));
    }
    Ok(lines.join("\n"))
}

fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let start = s.char_indices().nth(count - max_chars).map_or(0, |(i, _)| i);
    &s[start..]
}
