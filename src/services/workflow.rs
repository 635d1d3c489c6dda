use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::{Config, TimeoutConfig};
use crate::core::error::{with_timeout, Error, Result};
use crate::core::io::{is_non_empty_file, read_json, remove_path, write_file, write_json, StoryDirs};
use crate::core::state::{
    GenerationParams, GenerationStatus, Segment, Stage, StoryMeta, StoryText,
};
use crate::core::store::{ListFilter, StoryStore};
use crate::services::assembler::{AudioAssembler, FfmpegAssembler, MergeExtras};
use crate::services::content::{ContentBackend, ContentRequest, StoryWriter};
use crate::services::image::{create_image_backend, ImageBackend};
use crate::services::llm::create_llm;
use crate::services::tts::{create_speech_backend, synthesize_to_file, SpeechBackend, VoiceProfile};
use crate::utils::media::MediaTool;

const ID_LEN: usize = 8;
const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Per-run knobs that come from configuration rather than the request.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub base_url: String,
    pub intro_music: Option<PathBuf>,
    pub outro_music: Option<PathBuf>,
    pub silence_ms: u64,
    pub fadeout_ms: u64,
    pub timeouts: TimeoutConfig,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            intro_music: config.intro_music.clone(),
            outro_music: config.outro_music.clone(),
            silence_ms: config.audio.silence_ms,
            fadeout_ms: config.audio.fadeout_ms,
            timeouts: config.timeouts.clone(),
        }
    }
}

/// The adapters one workflow drives.
pub struct Backends {
    pub content: Box<dyn ContentBackend>,
    pub speech: Box<dyn SpeechBackend>,
    pub image: Box<dyn ImageBackend>,
    pub assembler: Box<dyn AudioAssembler>,
}

/// A story record together with its text segments.
#[derive(Debug, Clone, Serialize)]
pub struct StoryDetails {
    #[serde(flatten)]
    pub meta: StoryMeta,
    pub segments: Vec<Segment>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct RunEntry {
    status: watch::Receiver<GenerationStatus>,
    history: Arc<Mutex<Vec<Stage>>>,
}

/// Live runs of this process, keyed by story id. Entries outlive their run
/// so the final status and stage history stay queryable until deletion.
#[derive(Default)]
struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    /// Claims `story_id`. Fails if a run already holds it.
    fn reserve(&self, story_id: &str, entry: RunEntry) -> bool {
        match lock(&self.runs).entry(story_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    fn status(&self, story_id: &str) -> Option<GenerationStatus> {
        lock(&self.runs)
            .get(story_id)
            .map(|entry| entry.status.borrow().clone())
    }

    fn history(&self, story_id: &str) -> Option<Vec<Stage>> {
        lock(&self.runs)
            .get(story_id)
            .map(|entry| lock(&entry.history).clone())
    }

    fn remove(&self, story_id: &str) -> bool {
        lock(&self.runs).remove(story_id).is_some()
    }
}

/// Write side of one run's status.
struct RunReporter {
    story_id: String,
    status: watch::Sender<GenerationStatus>,
    history: Arc<Mutex<Vec<Stage>>>,
}

impl RunReporter {
    fn report(&self, stage: Stage, message: &str, pct: Option<u8>) {
        self.status.send_modify(|status| {
            status.status = stage;
            status.progress = message.to_string();
            if let Some(pct) = pct {
                status.progress_pct = pct;
            }
        });
        let mut history = lock(&self.history);
        if history.last() != Some(&stage) {
            history.push(stage);
        }
    }

    fn set_title(&self, title: &str) {
        self.status
            .send_modify(|status| status.title = Some(title.to_string()));
    }

    /// Writes to this run's record. A failed write is logged and the run
    /// goes on; a missing record means the story was deleted and the run
    /// must stop.
    async fn record<F>(&self, store: &StoryStore, what: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut StoryMeta),
    {
        match store.update(&self.story_id, mutate).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::NotFound(self.story_id.clone())),
            Err(e) => {
                warn!("Failed to persist {} for {}: {}", what, self.story_id, e);
                Ok(())
            }
        }
    }

    async fn step(&self, store: &StoryStore, stage: Stage, message: &str, pct: u8) -> Result<()> {
        info!("[{}] {}: {}", self.story_id, stage, message);
        self.report(stage, message, Some(pct));
        self.record(store, "progress", |meta| meta.record_progress(message, Some(pct)))
            .await
    }
}

/// Handle to a spawned run. Dropping it (or calling [`RunHandle::detach`])
/// leaves the run going in the background.
pub struct RunHandle {
    story_id: String,
    status: watch::Receiver<GenerationStatus>,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    /// A receiver that observes every status change of this run.
    pub fn subscribe(&self) -> watch::Receiver<GenerationStatus> {
        self.status.clone()
    }

    pub fn detach(self) -> String {
        self.story_id
    }

    /// Waits for the run to finish and returns its final status.
    pub async fn wait(self) -> Result<GenerationStatus> {
        let RunHandle { status, task, .. } = self;
        task.await?;
        let last = status.borrow().clone();
        Ok(last)
    }
}

struct Inner {
    dirs: StoryDirs,
    store: StoryStore,
    content: Box<dyn ContentBackend>,
    speech: Box<dyn SpeechBackend>,
    image: Box<dyn ImageBackend>,
    assembler: Box<dyn AudioAssembler>,
    settings: RunSettings,
    runs: RunRegistry,
}

/// Drives story runs from text to mastered audio and owns their status.
#[derive(Clone)]
pub struct StoryWorkflow {
    inner: Arc<Inner>,
}

impl StoryWorkflow {
    pub async fn new(dirs: StoryDirs, backends: Backends, settings: RunSettings) -> Self {
        let store = StoryStore::open(dirs.store_file()).await;
        Self {
            inner: Arc::new(Inner {
                dirs,
                store,
                content: backends.content,
                speech: backends.speech,
                image: backends.image,
                assembler: backends.assembler,
                settings,
                runs: RunRegistry::default(),
            }),
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.ensure_directories()?;

        let llm = create_llm(&config.llm)?;
        let content = StoryWriter::new(llm, config.story.clone(), &config.llm);
        let speech = create_speech_backend(&config.speech)?;
        let image = create_image_backend(&config.image)?;

        let media = MediaTool::from_config(&config.audio, config.timeouts.media());
        if !media.is_available().await {
            warn!(
                "{} or {} not found; audio assembly will fail",
                config.audio.ffmpeg.display(),
                config.audio.ffprobe.display()
            );
        }
        let assembler = FfmpegAssembler::from_config(&config.audio, media);

        let backends = Backends {
            content: Box::new(content),
            speech: Box::new(speech),
            image: Box::new(image),
            assembler: Box::new(assembler),
        };
        Ok(Self::new(
            StoryDirs::new(config.output_dir()),
            backends,
            RunSettings::from_config(config),
        )
        .await)
    }

    pub fn dirs(&self) -> &StoryDirs {
        &self.inner.dirs
    }

    /// Registers a new story and spawns its run. Returns as soon as the
    /// `generating` record is stored.
    pub async fn start(&self, params: GenerationParams) -> Result<RunHandle> {
        params.validate()?;
        let voice = self
            .inner
            .speech
            .catalog()
            .resolve(params.voice_key.as_deref())
            .cloned()
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Speech provider {} has no voices",
                    self.inner.speech.provider()
                ))
            })?;

        let (story_id, reporter, receiver) = self.allocate_run().await;

        let meta = StoryMeta::generating(&story_id, &params, &voice.key, &voice.name);
        if let Err(e) = self.inner.store.add_or_replace(meta).await {
            self.inner.runs.remove(&story_id);
            return Err(e);
        }
        info!(
            "Starting story {} ({} min, voice {})",
            story_id, params.target_minutes, voice.key
        );

        let task = tokio::spawn(Self::execute(self.inner.clone(), params, voice, reporter));
        Ok(RunHandle {
            story_id,
            status: receiver,
            task,
        })
    }

    async fn allocate_run(&self) -> (String, RunReporter, watch::Receiver<GenerationStatus>) {
        loop {
            let story_id = new_story_id();
            if self.inner.store.contains(&story_id).await {
                continue;
            }
            let (sender, receiver) = watch::channel(GenerationStatus::starting());
            let history = Arc::new(Mutex::new(vec![Stage::Starting]));
            let entry = RunEntry {
                status: receiver.clone(),
                history: history.clone(),
            };
            if self.inner.runs.reserve(&story_id, entry) {
                let reporter = RunReporter {
                    story_id: story_id.clone(),
                    status: sender,
                    history,
                };
                return (story_id, reporter, receiver);
            }
        }
    }

    async fn execute(inner: Arc<Inner>, params: GenerationParams, voice: VoiceProfile, reporter: RunReporter) {
        let story_id = reporter.story_id.clone();
        match Self::run_stages(&inner, &params, &voice, &reporter).await {
            Ok(()) => info!("Story {} finished", story_id),
            Err(_) if !inner.store.contains(&story_id).await => {
                info!("Story {} was deleted during its run, discarding its files", story_id);
                let dir = inner.dirs.story(&story_id);
                if let Err(e) = remove_path(dir.dir()).await {
                    warn!("Failed to remove {}: {}", dir.dir().display(), e);
                }
                reporter.report(Stage::Error, "Story was deleted", None);
            }
            Err(e) => {
                error!("Story {} failed: {}", story_id, e);
                let message = format!("Error: {}", e);
                if let Err(e) = inner
                    .store
                    .update(&story_id, |meta| meta.mark_error(&message))
                    .await
                {
                    error!("Failed to record error for {}: {}", story_id, e);
                }
                reporter.report(Stage::Error, &message, None);
            }
        }
    }

    async fn run_stages(
        inner: &Inner,
        params: &GenerationParams,
        voice: &VoiceProfile,
        reporter: &RunReporter,
    ) -> Result<()> {
        let story_id = reporter.story_id.as_str();
        let paths = inner.dirs.story(story_id);
        let timeouts = &inner.settings.timeouts;

        // 1. Text
        reporter
            .step(&inner.store, Stage::GeneratingText, "Writing the story...", 5)
            .await?;
        let request = ContentRequest::from_params(params);
        let on_progress = |message: &str| reporter.report(Stage::GeneratingText, message, None);
        let story: StoryText = with_timeout(
            "content generation",
            timeouts.content(),
            inner.content.generate(&request, &on_progress),
        )
        .await?;
        if story.segments.is_empty() {
            return Err(Error::InvalidInput("Story has no segments".to_string()));
        }

        reporter
            .record(&inner.store, "title", |meta| {
                meta.title = story.title.clone();
                meta.description = story.synopsis.clone();
            })
            .await?;
        reporter.set_title(&story.title);
        write_json(&paths.text_file(), &story).await?;
        reporter
            .step(&inner.store, Stage::GeneratingText, "Story text ready", 25)
            .await?;

        // 2. Audio
        let total = story.segments.len();
        let mut chunks = Vec::with_capacity(total);
        for (i, segment) in story.segments.iter().enumerate() {
            let pct = 30 + (50 * i / total) as u8;
            let message = format!("Synthesizing segment {} of {}: {}", i + 1, total, segment.title);
            reporter
                .step(&inner.store, Stage::GeneratingAudio, &message, pct)
                .await?;

            let text = speech_text(segment, i, total);
            let chunk = paths.segment_chunk(i);
            with_timeout(
                "speech synthesis",
                timeouts.speech(),
                synthesize_to_file(&*inner.speech, &text, voice, params.speech_rate, &chunk),
            )
            .await?;
            chunks.push(chunk);
        }

        reporter
            .step(&inner.store, Stage::GeneratingAudio, "Synthesizing title", 80)
            .await?;
        let title_chunk = paths.title_chunk();
        with_timeout(
            "speech synthesis",
            timeouts.speech(),
            synthesize_to_file(&*inner.speech, &story.title, voice, params.speech_rate, &title_chunk),
        )
        .await?;

        // 3. Merge and master
        reporter
            .step(&inner.store, Stage::Processing, "Merging and mastering audio", 85)
            .await?;
        let extras = MergeExtras {
            intro: inner.settings.intro_music.clone(),
            outro: inner.settings.outro_music.clone(),
            title_clip: Some(title_chunk),
            silence_ms: inner.settings.silence_ms,
            fadeout_ms: inner.settings.fadeout_ms,
        };
        let duration = with_timeout(
            "audio assembly",
            timeouts.media(),
            inner.assembler.merge(&chunks, &paths.final_audio(), &extras),
        )
        .await?;

        // 4. Cover image, never fatal
        reporter
            .step(&inner.store, Stage::Processing, "Generating cover image", 95)
            .await?;
        if let Some(image_url) = Self::cover_stage(inner, story_id, &story, params).await {
            reporter
                .record(&inner.store, "cover URL", |meta| meta.image_url = Some(image_url))
                .await?;
        }

        // 5. Finalize
        let chapters = total as u32;
        let words = story.word_count();
        reporter
            .record(&inner.store, "final state", |meta| {
                meta.mark_done(duration, chapters, words, "Done")
            })
            .await?;
        reporter.report(Stage::Done, "Done", Some(100));
        info!(
            "Story {} done: {:.1}s, {} chapters, {} words",
            story_id, duration, chapters, words
        );
        Ok(())
    }

    async fn cover_stage(
        inner: &Inner,
        story_id: &str,
        story: &StoryText,
        params: &GenerationParams,
    ) -> Option<String> {
        let generated = with_timeout(
            "cover image",
            inner.settings.timeouts.image(),
            inner
                .image
                .generate_cover(&story.synopsis, Some(&params.genre), Some(&params.style)),
        )
        .await;

        let bytes = match generated {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("No cover image for {} ({})", story_id, inner.image.provider());
                return None;
            }
            Err(e) => {
                warn!("Cover image for {} skipped: {}", story_id, e);
                return None;
            }
        };

        let cover = inner.dirs.story(story_id).cover_image();
        if let Err(e) = write_file(&cover, &bytes).await {
            warn!("Failed to save cover image {}: {}", cover.display(), e);
            return None;
        }
        match cover_url(&inner.settings.base_url, story_id) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Cannot build cover URL for {}: {}", story_id, e);
                None
            }
        }
    }

    /// Live status if this process runs (or ran) the story, else the
    /// persisted record's state.
    pub async fn poll_status(&self, story_id: &str) -> Result<GenerationStatus> {
        if let Some(status) = self.inner.runs.status(story_id) {
            return Ok(status);
        }
        let meta = self
            .inner
            .store
            .get(story_id)
            .await
            .ok_or_else(|| Error::NotFound(story_id.to_string()))?;
        Ok(GenerationStatus {
            status: Stage::from(meta.status),
            progress: meta.progress,
            progress_pct: meta.progress_pct,
            title: Some(meta.title),
        })
    }

    /// Distinct stages a run of this process has passed through, in order.
    pub fn stage_history(&self, story_id: &str) -> Option<Vec<Stage>> {
        self.inner.runs.history(story_id)
    }

    pub async fn list(&self, filter: ListFilter) -> Vec<StoryMeta> {
        self.inner.store.list(filter).await
    }

    pub async fn get(&self, story_id: &str) -> Result<StoryDetails> {
        let meta = self
            .inner
            .store
            .get(story_id)
            .await
            .ok_or_else(|| Error::NotFound(story_id.to_string()))?;
        let text_file = self.inner.dirs.story(story_id).text_file();
        let segments = match read_json::<StoryText>(&text_file).await {
            Ok(Some(text)) => text.segments,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Unreadable story text {}: {}", text_file.display(), e);
                Vec::new()
            }
        };
        Ok(StoryDetails { meta, segments })
    }

    /// Removes the record and the story directory. Returns whether any
    /// on-disk artifacts were removed. A run still in flight stops at its
    /// next stage boundary and removes what it wrote since.
    pub async fn delete(&self, story_id: &str) -> Result<bool> {
        if !self.inner.store.delete(story_id).await? {
            return Err(Error::NotFound(story_id.to_string()));
        }
        self.inner.runs.remove(story_id);
        let dir = self.inner.dirs.story(story_id);
        let removed = remove_path(dir.dir()).await?;
        info!("Deleted story {}", story_id);
        Ok(removed)
    }

    pub async fn set_publication_flag(&self, story_id: &str, enabled: bool) -> Result<bool> {
        if !self.inner.store.set_publication_flag(story_id, enabled).await? {
            return Err(Error::NotFound(story_id.to_string()));
        }
        Ok(enabled)
    }

    pub fn voices(&self) -> &[VoiceProfile] {
        self.inner.speech.catalog().voices()
    }

    /// Short sample of `voice_key`, cached under `previews/`.
    pub async fn preview_voice(&self, voice_key: &str) -> Result<PathBuf> {
        let voice = self
            .inner
            .speech
            .catalog()
            .resolve(Some(voice_key))
            .ok_or_else(|| Error::NotFound(format!("voice {}", voice_key)))?;
        let path = self.inner.dirs.preview_file(&voice.key);
        if is_non_empty_file(&path).await {
            return Ok(path);
        }

        let text = format!(
            "Hello! I'm {}, and I'll be narrating your story today.",
            voice.name
        );
        with_timeout(
            "voice preview",
            self.inner.settings.timeouts.speech(),
            synthesize_to_file(&*self.inner.speech, &text, voice, Default::default(), &path),
        )
        .await?;
        info!("Generated preview for voice {}", voice.key);
        Ok(path)
    }
}

fn new_story_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| ID_CHARS[rng.random_range(0..ID_CHARS.len())] as char)
        .collect()
}

/// Text handed to the speech backend for segment `index` of `total`.
/// Multi-part stories announce each chapter.
fn speech_text(segment: &Segment, index: usize, total: usize) -> String {
    if total > 1 {
        format!("Chapter {}. {}. ... {}", index + 1, segment.title, segment.text)
    } else {
        segment.text.clone()
    }
}

fn cover_url(base_url: &str, story_id: &str) -> Result<String> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let url = url::Url::parse(&base)
        .and_then(|b| b.join(&format!("api/stories/{}/image.png", story_id)))
        .map_err(|e| Error::InvalidInput(format!("Invalid base_url {:?}: {}", base_url, e)))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BackendError;
    use crate::core::state::{SpeechRate, StoryStatus};
    use crate::services::tts::VoiceCatalog;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedContent {
        story: StoryText,
        delay: Option<Duration>,
        requests: Arc<Mutex<Vec<ContentRequest>>>,
    }

    #[async_trait]
    impl ContentBackend for ScriptedContent {
        async fn generate(
            &self,
            request: &ContentRequest,
            on_progress: &(dyn for<'s> Fn(&'s str) + Send + Sync),
        ) -> std::result::Result<StoryText, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            on_progress("Writing...");
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.story.clone())
        }
    }

    struct MockSpeech {
        catalog: VoiceCatalog,
        fail: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SpeechBackend for MockSpeech {
        fn provider(&self) -> &str {
            "mock"
        }

        fn catalog(&self) -> &VoiceCatalog {
            &self.catalog
        }

        async fn synthesize(
            &self,
            text: &str,
            _voice: &VoiceProfile,
            _rate: SpeechRate,
        ) -> std::result::Result<Vec<u8>, BackendError> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(BackendError::new("mock", "quota exceeded"));
            }
            Ok(b"ID3 fake mp3".to_vec())
        }
    }

    #[derive(Clone, Copy)]
    enum ImageMode {
        Ok,
        Absent,
        Fail,
    }

    struct MockImage {
        mode: ImageMode,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ImageBackend for MockImage {
        fn provider(&self) -> &str {
            "mock"
        }

        async fn generate_cover(
            &self,
            _synopsis: &str,
            _genre: Option<&str>,
            _style: Option<&str>,
        ) -> std::result::Result<Option<Vec<u8>>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                ImageMode::Ok => Ok(Some(b"\x89PNG".to_vec())),
                ImageMode::Absent => Ok(None),
                ImageMode::Fail => Err(BackendError::new("mock", "content policy")),
            }
        }
    }

    type MergeCall = (Vec<PathBuf>, MergeExtras);

    struct FakeAssembler {
        calls: Arc<Mutex<Vec<MergeCall>>>,
    }

    #[async_trait]
    impl AudioAssembler for FakeAssembler {
        async fn merge(&self, segments: &[PathBuf], output: &Path, extras: &MergeExtras) -> Result<f64> {
            self.calls
                .lock()
                .unwrap()
                .push((segments.to_vec(), extras.clone()));
            write_file(output, b"merged").await?;
            Ok(12.5)
        }
    }

    /// Mocks plus their call recorders.
    struct Rig {
        story: StoryText,
        content_delay: Option<Duration>,
        voices: Vec<VoiceProfile>,
        speech_fails: bool,
        image_mode: ImageMode,
        timeouts: TimeoutConfig,
        requests: Arc<Mutex<Vec<ContentRequest>>>,
        speech_calls: Arc<Mutex<Vec<String>>>,
        image_calls: Arc<AtomicUsize>,
        merges: Arc<Mutex<Vec<MergeCall>>>,
    }

    impl Rig {
        fn new(story: StoryText) -> Self {
            Self {
                story,
                content_delay: None,
                voices: vec![
                    VoiceProfile::new("v1", "Voice One", "female", "mock-v1", "US", "Standard"),
                    VoiceProfile::new("v2", "Voice Two", "male", "mock-v2", "GB", "British"),
                ],
                speech_fails: false,
                image_mode: ImageMode::Ok,
                timeouts: TimeoutConfig::default(),
                requests: Arc::default(),
                speech_calls: Arc::default(),
                image_calls: Arc::default(),
                merges: Arc::default(),
            }
        }

        async fn workflow(&self, root: &Path) -> StoryWorkflow {
            let backends = Backends {
                content: Box::new(ScriptedContent {
                    story: self.story.clone(),
                    delay: self.content_delay,
                    requests: self.requests.clone(),
                }),
                speech: Box::new(MockSpeech {
                    catalog: VoiceCatalog::new(self.voices.clone(), "v1"),
                    fail: self.speech_fails,
                    calls: self.speech_calls.clone(),
                }),
                image: Box::new(MockImage {
                    mode: self.image_mode,
                    calls: self.image_calls.clone(),
                }),
                assembler: Box::new(FakeAssembler {
                    calls: self.merges.clone(),
                }),
            };
            let mut settings = RunSettings::from_config(&Config::default());
            settings.timeouts = self.timeouts.clone();
            StoryWorkflow::new(StoryDirs::new(root), backends, settings).await
        }
    }

    fn segment(title: &str, text: &str) -> Segment {
        Segment {
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    fn two_part_story() -> StoryText {
        StoryText {
            title: "The Toaster".to_string(),
            synopsis: "A kitchen appliance wakes up.".to_string(),
            segments: vec![
                segment("Wakeup", "The toaster blinked its coils."),
                segment("Breakfast", "It refused to burn the bread."),
            ],
        }
    }

    fn one_part_story() -> StoryText {
        StoryText {
            title: "Short".to_string(),
            synopsis: "Brief.".to_string(),
            segments: vec![segment("The Story", "Once there was a kettle.")],
        }
    }

    fn toaster_params() -> GenerationParams {
        GenerationParams {
            genre: "Sci-Fi".to_string(),
            style: "X".to_string(),
            target_minutes: 5,
            voice_key: Some("v1".to_string()),
            ..GenerationParams::new("a toaster gains sentience")
        }
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(two_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(toaster_params()).await.unwrap();
        let story_id = handle.story_id().to_string();
        let status = handle.wait().await.unwrap();

        assert_eq!(status.status, Stage::Done);
        assert_eq!(status.progress_pct, 100);
        assert_eq!(status.title.as_deref(), Some("The Toaster"));
        assert_eq!(
            workflow.stage_history(&story_id).unwrap(),
            vec![
                Stage::Starting,
                Stage::GeneratingText,
                Stage::GeneratingAudio,
                Stage::Processing,
                Stage::Done
            ]
        );

        let details = workflow.get(&story_id).await.unwrap();
        let meta = &details.meta;
        assert_eq!(meta.status, StoryStatus::Done);
        assert_eq!(meta.title, "The Toaster");
        assert_eq!(meta.description, "A kitchen appliance wakes up.");
        assert_eq!(meta.prompt, "a toaster gains sentience");
        assert_eq!(meta.voice_key, "v1");
        assert_eq!(meta.voice_name, "Voice One");
        assert_eq!(meta.chapter_count, Some(2));
        assert_eq!(meta.duration_seconds, Some(12.5));
        assert_eq!(meta.word_count, Some(11));
        assert_eq!(meta.progress_pct, 100);
        assert_eq!(
            meta.image_url.as_deref(),
            Some(format!("http://localhost:8000/api/stories/{}/image.png", story_id).as_str())
        );
        assert_eq!(details.segments.len(), 2);

        let paths = workflow.dirs().story(&story_id);
        assert!(paths.text_file().is_file());
        assert!(paths.final_audio().is_file());
        assert!(paths.cover_image().is_file());
        assert!(paths.segment_chunk(1).is_file());

        let requests = rig.requests.lock().unwrap();
        assert_eq!(requests[0].genre, "Sci-Fi");
        assert_eq!(requests[0].style, "X");
        assert_eq!(requests[0].target_minutes, 5);

        let speech = rig.speech_calls.lock().unwrap();
        assert_eq!(speech.len(), 3);
        assert!(speech[0].starts_with("Chapter 1. Wakeup."));
        assert!(speech[1].starts_with("Chapter 2. Breakfast."));
        assert_eq!(speech[2], "The Toaster");

        let merges = rig.merges.lock().unwrap();
        assert_eq!(merges.len(), 1);
        let (chunks, extras) = &merges[0];
        assert_eq!(chunks, &vec![paths.segment_chunk(0), paths.segment_chunk(1)]);
        assert_eq!(extras.title_clip, Some(paths.title_chunk()));
        assert_eq!(extras.silence_ms, 2500);
    }

    #[tokio::test]
    async fn test_speech_failure_marks_error_and_keeps_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(two_part_story());
        rig.speech_fails = true;
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(toaster_params()).await.unwrap();
        let story_id = handle.story_id().to_string();
        let status = handle.wait().await.unwrap();

        assert_eq!(status.status, Stage::Error);
        assert!(status.progress.starts_with("Error: "));
        assert!(status.progress.contains("quota exceeded"));

        let meta = workflow.get(&story_id).await.unwrap().meta;
        assert_eq!(meta.status, StoryStatus::Error);
        assert_eq!(meta.image_url, None);
        assert_eq!(meta.duration_seconds, None);
        assert_eq!(meta.title, "The Toaster");

        let paths = workflow.dirs().story(&story_id);
        assert!(!paths.final_audio().exists());
        assert!(paths.text_file().is_file());
        assert_eq!(rig.image_calls.load(Ordering::SeqCst), 0);
        assert!(rig.merges.lock().unwrap().is_empty());
        assert_eq!(rig.speech_calls.lock().unwrap().len(), 1);
        assert_eq!(workflow.stage_history(&story_id).unwrap().last(), Some(&Stage::Error));
    }

    #[tokio::test]
    async fn test_cover_problems_are_not_fatal() {
        for mode in [ImageMode::Fail, ImageMode::Absent] {
            let dir = tempfile::tempdir().unwrap();
            let mut rig = Rig::new(one_part_story());
            rig.image_mode = mode;
            let workflow = rig.workflow(dir.path()).await;

            let handle = workflow.start(GenerationParams::new("a kettle")).await.unwrap();
            let story_id = handle.story_id().to_string();
            assert_eq!(handle.wait().await.unwrap().status, Stage::Done);

            let meta = workflow.get(&story_id).await.unwrap().meta;
            assert_eq!(meta.status, StoryStatus::Done);
            assert_eq!(meta.image_url, None);
            assert!(!workflow.dirs().story(&story_id).cover_image().exists());
            assert_eq!(rig.image_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_store_write_failures_do_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(GenerationParams::new("a kettle")).await.unwrap();
        let story_id = handle.story_id().to_string();

        // A directory in place of the store file fails every later write.
        let store_file = workflow.dirs().store_file();
        std::fs::remove_file(&store_file).unwrap();
        std::fs::create_dir(&store_file).unwrap();

        let status = handle.wait().await.unwrap();
        assert_eq!(status.status, Stage::Done);
        assert_eq!(status.progress_pct, 100);
        assert_eq!(status.title.as_deref(), Some("Short"));

        let paths = workflow.dirs().story(&story_id);
        assert!(paths.final_audio().is_file());
        assert!(paths.cover_image().is_file());
        assert_eq!(rig.image_calls.load(Ordering::SeqCst), 1);

        let meta = workflow.get(&story_id).await.unwrap().meta;
        assert_eq!(meta.status, StoryStatus::Generating);
        assert_eq!(meta.image_url, None);
    }

    #[tokio::test]
    async fn test_delete_during_run_discards_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(two_part_story());
        rig.content_delay = Some(Duration::from_millis(200));
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(toaster_params()).await.unwrap();
        let story_id = handle.story_id().to_string();
        workflow.delete(&story_id).await.unwrap();

        let status = handle.wait().await.unwrap();
        assert_eq!(status.status, Stage::Error);
        assert_eq!(status.progress, "Story was deleted");

        assert!(!workflow.dirs().story(&story_id).dir().exists());
        assert!(workflow.list(ListFilter::default()).await.is_empty());
        assert!(matches!(workflow.poll_status(&story_id).await, Err(Error::NotFound(_))));
        assert!(rig.speech_calls.lock().unwrap().is_empty());
        assert!(rig.merges.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_segment_has_no_chapter_announcement() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(GenerationParams::new("a kettle")).await.unwrap();
        handle.wait().await.unwrap();

        let speech = rig.speech_calls.lock().unwrap();
        assert_eq!(speech[0], "Once there was a kettle.");
    }

    #[tokio::test]
    async fn test_start_returns_fresh_ids_with_generating_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(one_part_story());
        rig.content_delay = Some(Duration::from_millis(100));
        let workflow = rig.workflow(dir.path()).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let handle = workflow.start(GenerationParams::new("idea")).await.unwrap();
            let status = workflow.poll_status(handle.story_id()).await.unwrap();
            assert!(!status.status.is_terminal());
            let meta = workflow.get(handle.story_id()).await.unwrap().meta;
            assert_eq!(meta.status, StoryStatus::Generating);
            handles.push(handle);
        }

        let mut ids: Vec<String> = handles.iter().map(|h| h.story_id().to_string()).collect();
        for id in &ids {
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        for handle in handles {
            assert_eq!(handle.wait().await.unwrap().status, Stage::Done);
        }
        assert_eq!(workflow.list(ListFilter::default()).await.len(), 5);
    }

    #[tokio::test]
    async fn test_content_timeout_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new(one_part_story());
        rig.content_delay = Some(Duration::from_secs(5));
        rig.timeouts.content_secs = 0;
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(GenerationParams::new("slow idea")).await.unwrap();
        let story_id = handle.story_id().to_string();
        let status = handle.wait().await.unwrap();
        assert_eq!(status.status, Stage::Error);
        assert!(status.progress.contains("timed out"));

        let meta = workflow.get(&story_id).await.unwrap().meta;
        assert_eq!(meta.status, StoryStatus::Error);
        assert!(rig.speech_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_falls_back_to_store_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let story_id = {
            let workflow = rig.workflow(dir.path()).await;
            let handle = workflow.start(GenerationParams::new("a kettle")).await.unwrap();
            let story_id = handle.story_id().to_string();
            handle.wait().await.unwrap();
            story_id
        };

        let restarted = rig.workflow(dir.path()).await;
        assert_eq!(restarted.stage_history(&story_id), None);
        let status = restarted.poll_status(&story_id).await.unwrap();
        assert_eq!(status.status, Stage::Done);
        assert_eq!(status.progress_pct, 100);
        assert_eq!(status.title.as_deref(), Some("Short"));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(two_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let handle = workflow.start(toaster_params()).await.unwrap();
        let story_id = handle.story_id().to_string();
        handle.wait().await.unwrap();
        let story_dir = workflow.dirs().story(&story_id).dir().to_path_buf();
        assert!(story_dir.is_dir());

        assert!(workflow.delete(&story_id).await.unwrap());
        assert!(!story_dir.exists());
        assert!(workflow.list(ListFilter::default()).await.is_empty());
        assert!(matches!(workflow.poll_status(&story_id).await, Err(Error::NotFound(_))));
        assert!(matches!(workflow.delete(&story_id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Rig::new(one_part_story()).workflow(dir.path()).await;

        assert!(matches!(workflow.get("nope1234").await, Err(Error::NotFound(_))));
        assert!(matches!(workflow.poll_status("nope1234").await, Err(Error::NotFound(_))));
        assert!(matches!(
            workflow.set_publication_flag("nope1234", true).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(workflow.delete("nope1234").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_publication_flag_filters_listing() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let first = workflow.start(GenerationParams::new("one")).await.unwrap();
        let first_id = first.story_id().to_string();
        first.wait().await.unwrap();
        let second = workflow.start(GenerationParams::new("two")).await.unwrap();
        second.wait().await.unwrap();

        assert!(workflow.set_publication_flag(&first_id, true).await.unwrap());
        let published = workflow.list(ListFilter::published_only()).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, first_id);

        workflow.set_publication_flag(&first_id, false).await.unwrap();
        assert!(workflow.list(ListFilter::published_only()).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Rig::new(one_part_story()).workflow(dir.path()).await;
        assert!(matches!(
            workflow.start(GenerationParams::new("  ")).await,
            Err(Error::InvalidInput(_))
        ));

        let mut rig = Rig::new(one_part_story());
        rig.voices.clear();
        let voiceless = rig.workflow(dir.path()).await;
        assert!(matches!(
            voiceless.start(GenerationParams::new("idea")).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(voiceless.list(ListFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_voice_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let mut params = GenerationParams::new("idea");
        params.voice_key = Some("nobody".to_string());
        let handle = workflow.start(params).await.unwrap();
        let story_id = handle.story_id().to_string();
        handle.wait().await.unwrap();
        assert_eq!(workflow.get(&story_id).await.unwrap().meta.voice_key, "v1");
    }

    #[tokio::test]
    async fn test_preview_is_cached_until_emptied() {
        let dir = tempfile::tempdir().unwrap();
        let rig = Rig::new(one_part_story());
        let workflow = rig.workflow(dir.path()).await;

        let path = workflow.preview_voice("v2").await.unwrap();
        assert_eq!(path, dir.path().join("previews").join("v2.mp3"));
        assert!(is_non_empty_file(&path).await);
        workflow.preview_voice("v2").await.unwrap();
        assert_eq!(rig.speech_calls.lock().unwrap().len(), 1);
        assert!(rig.speech_calls.lock().unwrap()[0].contains("Voice Two"));

        std::fs::write(&path, b"").unwrap();
        workflow.preview_voice("v2").await.unwrap();
        assert_eq!(rig.speech_calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_cover_url_joins_base() {
        assert_eq!(
            cover_url("http://localhost:8000", "abc12345").unwrap(),
            "http://localhost:8000/api/stories/abc12345/image.png"
        );
        assert_eq!(
            cover_url("https://example.org/podcast/", "abc12345").unwrap(),
            "https://example.org/podcast/api/stories/abc12345/image.png"
        );
        assert!(cover_url("not a url", "abc12345").is_err());
    }
}
