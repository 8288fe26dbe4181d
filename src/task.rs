//! Task registry and the per-task runner.
//!
//! The registry is the only process-wide state: an in-memory map from
//! task id to its record, read by pollers while the owning runner task
//! mutates it. Every other artifact lives on disk in the task workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::download;
use crate::dub;
use crate::error::{Result, SublingoError};
use crate::lang;
use crate::media;
use crate::pipeline::{PipelineParams, SubtitlePipeline};
use crate::prompts;
use crate::providers::Providers;
use crate::srt::{self, SubtitleFileInfo, SubtitlePolicy};
use crate::workspace;

pub const FAIL_LINK_TO_AUDIO: &str = "link to audio error";
pub const FAIL_GET_VIDEO_INFO: &str = "get video info error";
pub const FAIL_AUDIO_TO_SUBTITLE: &str = "audio to subtitle error";
pub const FAIL_UPLOAD_SUBTITLES: &str = "upload subtitles error";
pub const FAIL_SRT_TO_SPEECH: &str = "srt file to speech error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// What a task's poller sees.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub workspace: PathBuf,
    pub status: TaskStatus,
    pub process_pct: u8,
    pub fail_reason: Option<String>,
    pub title: String,
    pub description: String,
    pub translated_title: String,
    pub translated_description: String,
    pub origin_lang: String,
    pub target_lang: String,
    pub subtitle_infos: Vec<SubtitleFileInfo>,
    pub speech_path: Option<PathBuf>,
}

impl TaskRecord {
    fn new(id: String, workspace: PathBuf, origin_lang: String, target_lang: String) -> Self {
        Self {
            id,
            workspace,
            status: TaskStatus::Processing,
            process_pct: 0,
            fail_reason: None,
            title: String::new(),
            description: String::new(),
            translated_title: String::new(),
            translated_description: String::new(),
            origin_lang,
            target_lang,
            subtitle_infos: Vec::new(),
            speech_path: None,
        }
    }
}

/// In-memory task map. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TaskRecord) {
        self.inner
            .lock()
            .expect("task registry lock")
            .insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.inner.lock().expect("task registry lock").get(id).cloned()
    }

    pub fn list(&self) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .expect("task registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn update<F: FnOnce(&mut TaskRecord)>(&self, id: &str, apply: F) {
        let mut map = self.inner.lock().expect("task registry lock");
        if let Some(record) = map.get_mut(id) {
            apply(record);
        }
    }

    /// Progress only ever moves forward.
    pub fn set_progress(&self, id: &str, pct: u8) {
        self.update(id, |record| {
            if pct > record.process_pct {
                record.process_pct = pct.min(100);
            }
        });
    }

    fn fail(&self, id: &str, reason: &str) {
        self.update(id, |record| {
            record.status = TaskStatus::Failed;
            record.fail_reason = Some(reason.to_string());
        });
    }
}

/// Where the audio comes from.
#[derive(Debug, Clone)]
pub enum TaskSource {
    Url(String),
    File(PathBuf),
    /// A word-timed caption file; skips acquisition and ASR entirely.
    WordTimedVtt(PathBuf),
}

impl TaskSource {
    /// Classify a CLI input string.
    pub fn parse(input: &str) -> TaskSource {
        if download::is_supported_url(input) {
            return TaskSource::Url(input.to_string());
        }
        let path = PathBuf::from(input);
        if path.extension().and_then(|e| e.to_str()) == Some("vtt") {
            TaskSource::WordTimedVtt(path)
        } else {
            TaskSource::File(path)
        }
    }
}

/// One task request, mirroring the start-task API fields.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub source: TaskSource,
    pub origin_lang: String,
    /// "none" disables translation outputs.
    pub target_lang: String,
    pub policy: SubtitlePolicy,
    pub modal_filter: bool,
    pub enable_tts: bool,
    pub tts_voice: String,
    /// `before -> after` replacement pairs applied to emitted files.
    pub replace: Vec<(String, String)>,
    /// UI language for artifact display names ("en" or "zh").
    pub ui_language: String,
    pub words_per_line: usize,
}

impl TaskRequest {
    /// Resolve the result policy from the request flags, the way the
    /// start endpoint would: no target language means origin-only;
    /// bilingual plus a position picks the stacking order.
    pub fn resolve_policy(target_lang: &str, bilingual: bool, translation_on_top: bool) -> SubtitlePolicy {
        if target_lang == "none" {
            SubtitlePolicy::OriginOnly
        } else if bilingual {
            if translation_on_top {
                SubtitlePolicy::BilingualTop
            } else {
                SubtitlePolicy::BilingualBottom
            }
        } else {
            SubtitlePolicy::TargetOnly
        }
    }
}

/// Parse `before|after` strings into replacement pairs, skipping
/// malformed entries.
pub fn parse_replace_pairs(raw: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for entry in raw {
        let mut split = entry.splitn(2, '|');
        match (split.next(), split.next()) {
            (Some(before), Some(after)) if !before.is_empty() => {
                pairs.push((before.to_string(), after.to_string()));
            }
            _ => warn!(entry = %entry, "ignoring malformed replace pair"),
        }
    }
    pairs
}

pub fn generate_task_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Create the workspace, register the task, and spawn its runner.
/// Returns the new task id immediately.
pub fn start_task(
    registry: &TaskRegistry,
    config: Config,
    providers: Providers,
    request: TaskRequest,
    tasks_root: &Path,
) -> Result<String> {
    if let TaskSource::Url(url) = &request.source {
        if !download::is_supported_url(url) {
            return Err(SublingoError::Download(format!("invalid link: {url}")));
        }
    }

    let task_id = generate_task_id();
    let workspace_dir = tasks_root.join(&task_id);
    std::fs::create_dir_all(&workspace_dir)?;

    registry.insert(TaskRecord::new(
        task_id.clone(),
        workspace_dir.clone(),
        request.origin_lang.clone(),
        request.target_lang.clone(),
    ));

    let registry = registry.clone();
    let id = task_id.clone();
    tokio::spawn(async move {
        info!(task = %id, "subtitle task started");
        run_task(&registry, &id, config, providers, request, workspace_dir).await;
        info!(task = %id, "subtitle task finished");
    });

    Ok(task_id)
}

async fn run_task(
    registry: &TaskRegistry,
    task_id: &str,
    config: Config,
    providers: Providers,
    request: TaskRequest,
    workspace_dir: PathBuf,
) {
    // Step 1: acquire audio (or accept the word-timed captions as-is).
    let acquired = acquire_audio(&config, &request, &workspace_dir).await;
    let audio_input = match acquired {
        Ok(input) => input,
        Err(e) => {
            error!(task = task_id, error = %e, "audio acquisition failed");
            registry.fail(task_id, FAIL_LINK_TO_AUDIO);
            return;
        }
    };
    registry.set_progress(task_id, 6);

    // Step 2: video metadata, URL sources only.
    if let TaskSource::Url(url) = &request.source {
        if let Err(e) = fetch_and_translate_info(registry, task_id, &config, &providers, url,
            &request.target_lang).await
        {
            error!(task = task_id, error = %e, "video info step failed");
            registry.fail(task_id, FAIL_GET_VIDEO_INFO);
            return;
        }
    }
    registry.set_progress(task_id, 10);

    // Step 3: the subtitle pipeline plus the bilingual split.
    let params = PipelineParams {
        origin_lang: request.origin_lang.clone(),
        target_lang: request.target_lang.clone(),
        policy: request.policy,
        modal_filter: request.modal_filter,
        words_per_line: request.words_per_line,
    };
    let progress_registry = registry.clone();
    let progress_id = task_id.to_string();
    let pipeline = SubtitlePipeline::new(
        providers.clone(),
        config.clone(),
        Arc::new(move |pct| progress_registry.set_progress(&progress_id, pct)),
    );

    let run = async {
        let outputs = match &audio_input {
            AudioInput::Audio(path) => {
                pipeline.audio_to_subtitle(path, &workspace_dir, &params).await?
            }
            AudioInput::WordTimedVtt(path) => {
                pipeline.vtt_to_subtitle(path, &workspace_dir, &params).await?
            }
        };
        let split = srt::split_bilingual_srt(
            &outputs.bilingual,
            &workspace_dir,
            params.policy.target_on_top(),
        )?;
        Ok::<_, SublingoError>((outputs, split))
    };
    let (outputs, split) = match run.await {
        Ok(result) => result,
        Err(e) => {
            error!(task = task_id, error = %e, "subtitle generation failed");
            registry.fail(task_id, FAIL_AUDIO_TO_SUBTITLE);
            return;
        }
    };
    registry.set_progress(task_id, 95);

    // Step 4: optional dubbing from the bilingual timeline.
    let mut speech_path = None;
    if request.enable_tts {
        let video = match &request.source {
            TaskSource::File(path) if is_video_file(path) => Some(path.as_path()),
            _ => None,
        };
        match dub::srt_to_speech(
            providers.tts.as_ref(),
            &config,
            &workspace_dir,
            &outputs.bilingual,
            params.policy.target_on_top(),
            &request.tts_voice,
            video,
        )
        .await
        {
            Ok(dubbed) => {
                speech_path = Some(dubbed.video.unwrap_or(dubbed.audio));
            }
            Err(e) => {
                error!(task = task_id, error = %e, "dubbing failed");
                registry.fail(task_id, FAIL_SRT_TO_SPEECH);
                return;
            }
        }
        registry.set_progress(task_id, 98);
    }

    // Step 5: replacements and final record.
    match finalize_artifacts(&request, &outputs.bilingual, &split) {
        Ok(infos) => {
            registry.update(task_id, |record| {
                record.subtitle_infos = infos;
                record.speech_path = speech_path.clone();
                record.status = TaskStatus::Success;
            });
            registry.set_progress(task_id, 100);
        }
        Err(e) => {
            error!(task = task_id, error = %e, "artifact finalization failed");
            registry.fail(task_id, FAIL_UPLOAD_SUBTITLES);
        }
    }
}

enum AudioInput {
    Audio(PathBuf),
    WordTimedVtt(PathBuf),
}

async fn acquire_audio(
    config: &Config,
    request: &TaskRequest,
    workspace_dir: &Path,
) -> Result<AudioInput> {
    let audio_path = workspace_dir.join(workspace::AUDIO_FILE);
    match &request.source {
        TaskSource::Url(url) => {
            let config = config.clone();
            let url = url.clone();
            let path = audio_path.clone();
            tokio::task::spawn_blocking(move || download::download_audio(&config, &url, &path))
                .await
                .map_err(|e| SublingoError::Download(format!("download task panicked: {e}")))??;
            Ok(AudioInput::Audio(audio_path))
        }
        TaskSource::File(input) => {
            if !input.exists() {
                return Err(SublingoError::FileNotFound(input.display().to_string()));
            }
            let config = config.clone();
            let input = input.clone();
            let path = audio_path.clone();
            tokio::task::spawn_blocking(move || {
                media::extract_audio(&config.ffmpeg_path, &input, &path)
            })
            .await
            .map_err(|e| SublingoError::Media(format!("extract task panicked: {e}")))??;
            Ok(AudioInput::Audio(audio_path))
        }
        TaskSource::WordTimedVtt(path) => {
            if !path.exists() {
                return Err(SublingoError::FileNotFound(path.display().to_string()));
            }
            Ok(AudioInput::WordTimedVtt(path.clone()))
        }
    }
}

/// Fetch title/description through the downloader and translate them with
/// a single chat call. Fetch failures degrade to empty strings; only the
/// registry write can fail the step.
async fn fetch_and_translate_info(
    registry: &TaskRegistry,
    task_id: &str,
    config: &Config,
    providers: &Providers,
    url: &str,
    target_lang: &str,
) -> Result<()> {
    let fetch_config = config.clone();
    let fetch_url = url.to_string();
    let (title, description) =
        tokio::task::spawn_blocking(move || download::fetch_video_info(&fetch_config, &fetch_url))
            .await
            .unwrap_or_default();

    let mut translated_title = String::new();
    let mut translated_description = String::new();
    if !title.is_empty() || !description.is_empty() {
        let prompt = prompts::translate_title_and_description_prompt(
            lang::language_name(target_lang),
            &format!("{title}####{description}"),
        );
        match providers.chat.chat_completion(&prompt).await {
            Ok(result) => {
                let mut parts = result.splitn(2, "####");
                translated_title = parts.next().unwrap_or("").trim().to_string();
                translated_description = parts.next().unwrap_or("").trim().to_string();
            }
            Err(e) => warn!(error = %e, "video info translation failed"),
        }
    }

    registry.update(task_id, |record| {
        record.title = title;
        record.description = description;
        record.translated_title = translated_title;
        record.translated_description = translated_description;
    });
    Ok(())
}

fn is_video_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("mp4" | "mkv" | "avi" | "mov" | "webm")
    )
}

/// Apply the replacement table and assemble the download artifact list
/// according to the result policy.
fn finalize_artifacts(
    request: &TaskRequest,
    bilingual: &Path,
    split: &srt::SplitOutputs,
) -> Result<Vec<SubtitleFileInfo>> {
    let ui_chinese = request.ui_language.starts_with("zh");
    let mut infos = Vec::new();

    let mut push = |path: &Path, language: &str, name: String| -> Result<()> {
        let final_path = if request.replace.is_empty() {
            path.to_path_buf()
        } else {
            let replaced = with_replaced_suffix(path);
            srt::replace_words_in_file(path, &replaced, &request.replace)?;
            replaced
        };
        infos.push(SubtitleFileInfo {
            path: final_path,
            language: language.to_string(),
            name,
        });
        Ok(())
    };

    let origin_name = if ui_chinese {
        format!("{} 单语字幕", lang::language_name(&request.origin_lang))
    } else {
        format!("{} Subtitle", lang::language_name(&request.origin_lang))
    };
    push(&split.origin_srt, &request.origin_lang, origin_name)?;

    if request.policy.wants_target_file() {
        let target_name = if ui_chinese {
            format!("{} 单语字幕", lang::language_name(&request.target_lang))
        } else {
            format!("{} Subtitle", lang::language_name(&request.target_lang))
        };
        push(&split.target_srt, &request.target_lang, target_name)?;
    }

    if request.policy.wants_bilingual_file() {
        let name = if ui_chinese {
            "双语字幕".to_string()
        } else {
            "Bilingual Subtitle".to_string()
        };
        push(bilingual, "bilingual", name)?;
    }

    Ok(infos)
}

fn with_replaced_suffix(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("srt");
    path.with_file_name(format!("{stem}_replaced.{ext}"))
}
