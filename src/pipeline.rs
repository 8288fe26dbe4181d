//! The three-stage streaming subtitle pipeline.
//!
//! Stage A transcribes segments one at a time in index order. Stage B
//! fans segments out to bounded split-and-translate workers; completion
//! order is not preserved. Stage C timestamps sequentially on the calling
//! task, tagging per-segment output files by index so merge order is
//! recovered at merge time. A single cancellation token governs all
//! stages; the stage C channel outlives its writers because every worker
//! owns a sender clone that drops when the worker finishes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::align::{self, SentenceTimestamps};
use crate::config::Config;
use crate::error::{Result, SublingoError};
use crate::lang;
use crate::media;
use crate::prompts;
use crate::providers::{Providers, Transcription, Word};
use crate::segment::{self, SegmentRange};
use crate::sentence;
use crate::srt::{self, SrtBlock, SubtitlePolicy};
use crate::translate::Translator;
use crate::vtt;
use crate::workspace;

/// Progress percentages are pushed through this callback; the task runner
/// mirrors them into the registry.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

const TRANSCRIBE_ATTEMPTS: usize = 3;
const PROGRESS_FLOOR: u64 = 20;
const PROGRESS_CEIL: u64 = 90;

/// Per-task pipeline parameters derived from the request.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub origin_lang: String,
    pub target_lang: String,
    pub policy: SubtitlePolicy,
    pub modal_filter: bool,
    pub words_per_line: usize,
}

/// One audio segment moving through the stages.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub index: usize,
    pub range: SegmentRange,
    pub audio_path: PathBuf,
    pub transcription: Option<Transcription>,
    pub srt_no_ts_path: Option<PathBuf>,
}

/// Paths of the merged artifacts.
#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub origin_no_ts: PathBuf,
    pub bilingual: PathBuf,
    pub short_origin_mixed: PathBuf,
    pub short_origin: PathBuf,
}

pub struct SubtitlePipeline {
    providers: Providers,
    translator: Arc<Translator>,
    config: Config,
    progress: ProgressFn,
}

impl SubtitlePipeline {
    pub fn new(providers: Providers, config: Config, progress: ProgressFn) -> Self {
        let translator = Arc::new(Translator::new(
            providers.chat.clone(),
            config.translate_parallel,
            config.max_sentence_length,
        ));
        Self {
            providers,
            translator,
            config,
            progress,
        }
    }

    /// Full audio-to-subtitle run: plan and clip segments, stream them
    /// through the three stages, merge per-segment artifacts.
    pub async fn audio_to_subtitle(
        &self,
        audio: &Path,
        workspace_dir: &Path,
        params: &PipelineParams,
    ) -> Result<PipelineOutputs> {
        let jobs = self.prepare_segments(audio, workspace_dir).await?;
        let count = jobs.len();
        self.run_stages(workspace_dir, jobs, params).await?;
        let outputs = self.merge_outputs(workspace_dir, count)?;
        (self.progress)(PROGRESS_CEIL as u8);
        Ok(outputs)
    }

    /// Plan cut points and clip one file per segment.
    pub async fn prepare_segments(
        &self,
        audio: &Path,
        workspace_dir: &Path,
    ) -> Result<Vec<SegmentJob>> {
        let ffmpeg = self.config.ffmpeg_path.clone();
        let ffprobe = self.config.ffprobe_path.clone();
        let segment_seconds = self.config.segment_seconds;
        let audio = audio.to_path_buf();
        let workspace_dir = workspace_dir.to_path_buf();

        let jobs = tokio::task::spawn_blocking(move || -> Result<Vec<SegmentJob>> {
            let ranges = match segment::plan_segments(&ffmpeg, &ffprobe, &audio, segment_seconds)
            {
                Ok(ranges) => ranges,
                Err(e) => {
                    warn!(error = %e, "quiet-point planner failed, falling back to fixed segments");
                    let total = media::probe_duration(&ffprobe, &audio)?;
                    segment::plan_fixed_segments(total, segment_seconds)
                }
            };

            let mut jobs = Vec::with_capacity(ranges.len());
            for (index, range) in ranges.iter().enumerate() {
                let path = workspace_dir.join(workspace::split_audio_file(index));
                media::clip_audio(&ffmpeg, &audio, &path, range.start, range.end)?;
                jobs.push(SegmentJob {
                    index,
                    range: *range,
                    audio_path: path,
                    transcription: None,
                    srt_no_ts_path: None,
                });
            }
            Ok(jobs)
        })
        .await
        .map_err(|e| SublingoError::Media(format!("segment preparation panicked: {e}")))??;

        info!(segments = jobs.len(), "audio segmented");
        (self.progress)(PROGRESS_FLOOR as u8);
        Ok(jobs)
    }

    /// Run transcription, split-and-translate, and timestamping over the
    /// prepared segments, writing the per-segment file families.
    pub async fn run_stages(
        &self,
        workspace_dir: &Path,
        jobs: Vec<SegmentJob>,
        params: &PipelineParams,
    ) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let total_steps = jobs.len() * 3;
        let step_counter = Arc::new(AtomicUsize::new(0));
        let progress = self.progress.clone();
        let step = Arc::new(move || {
            let step_num = step_counter.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            let pct = (PROGRESS_FLOOR + 70 * step_num / total_steps as u64)
                .clamp(PROGRESS_FLOOR, PROGRESS_CEIL) as u8;
            progress(pct);
        });

        let parallel = self.config.translate_parallel;
        let buffer = jobs.len().max(parallel);
        let (tx_translate, rx_translate) = mpsc::channel::<SegmentJob>(buffer);
        let (tx_timestamp, mut rx_timestamp) = mpsc::channel::<SegmentJob>(buffer);
        let cancel = CancellationToken::new();
        let worker_error: Arc<Mutex<Option<SublingoError>>> = Arc::new(Mutex::new(None));

        // Stage A: sequential transcription in index order.
        let stage_a = tokio::spawn(transcription_stage(
            self.providers.clone(),
            jobs,
            params.origin_lang.clone(),
            workspace_dir.to_path_buf(),
            tx_translate,
            cancel.clone(),
            step.clone(),
        ));

        // Stage B: manager spawning bounded split-and-translate workers.
        let stage_b = tokio::spawn(translation_stage_manager(
            self.translator.clone(),
            workspace_dir.to_path_buf(),
            params.clone(),
            rx_translate,
            tx_timestamp,
            parallel,
            cancel.clone(),
            worker_error.clone(),
            step.clone(),
        ));

        // Stage C on the calling task: timestamp in arrival order.
        let mut stage_c_error: Option<SublingoError> = None;
        while let Some(job) = rx_timestamp.recv().await {
            if cancel.is_cancelled() {
                stage_c_error.get_or_insert(SublingoError::Cancelled);
                break;
            }
            debug!(segment = job.index, "timestamping segment");
            if let Err(e) = self.timestamp_segment(workspace_dir, &job, params) {
                error!(segment = job.index, error = %e, "timestamping failed");
                stage_c_error = Some(e);
                cancel.cancel();
                break;
            }
            step();
        }
        // Unblock any worker still sending, then drain.
        rx_timestamp.close();
        while rx_timestamp.try_recv().is_ok() {}

        let stage_a_result = stage_a
            .await
            .unwrap_or_else(|e| Err(SublingoError::Transcription(format!("stage panicked: {e}"))));
        let stage_b_result = stage_b
            .await
            .unwrap_or_else(|e| Err(SublingoError::Translation(format!("stage panicked: {e}"))));

        // First failure wins, in stage order, except that a concrete error
        // always beats a bare cancellation echo from a sibling stage.
        let mut errors: Vec<SublingoError> = Vec::new();
        if let Err(e) = stage_a_result {
            errors.push(e);
        }
        if let Err(e) = stage_b_result {
            errors.push(e);
        }
        if let Some(e) = worker_error.lock().expect("worker error lock").take() {
            errors.push(e);
        }
        if let Some(e) = stage_c_error {
            errors.push(e);
        }
        if let Some(pos) = errors
            .iter()
            .position(|e| !matches!(e, SublingoError::Cancelled))
        {
            return Err(errors.swap_remove(pos));
        }
        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(SublingoError::Cancelled);
        }
        Ok(())
    }

    /// Concatenate the four per-segment file families in index order.
    /// Missing per-segment files are warned about and skipped.
    pub fn merge_outputs(
        &self,
        workspace_dir: &Path,
        num_segments: usize,
    ) -> Result<PipelineOutputs> {
        let gather = |name: fn(usize) -> String| -> Vec<PathBuf> {
            (0..num_segments).map(|i| workspace_dir.join(name(i))).collect()
        };

        let outputs = PipelineOutputs {
            origin_no_ts: workspace_dir.join(workspace::ORIGIN_NO_TS_FILE),
            bilingual: workspace_dir.join(workspace::BILINGUAL_FILE),
            short_origin_mixed: workspace_dir.join(workspace::SHORT_ORIGIN_MIXED_FILE),
            short_origin: workspace_dir.join(workspace::SHORT_ORIGIN_FILE),
        };

        srt::merge_plain_files(&outputs.origin_no_ts, &gather(workspace::split_origin_no_ts_file))?;
        srt::merge_srt_files(&outputs.bilingual, &gather(workspace::split_bilingual_file))?;
        srt::merge_srt_files(
            &outputs.short_origin_mixed,
            &gather(workspace::split_short_origin_mixed_file),
        )?;
        srt::merge_srt_files(&outputs.short_origin, &gather(workspace::split_short_origin_file))?;

        info!("per-segment subtitle files merged");
        Ok(outputs)
    }

    /// Stage C for one segment: parse the no-timestamp file, align every
    /// block, write the bilingual and short-origin variants with the
    /// segment's global time offset applied.
    fn timestamp_segment(
        &self,
        workspace_dir: &Path,
        job: &SegmentJob,
        params: &PipelineParams,
    ) -> Result<()> {
        let no_ts_path = job.srt_no_ts_path.as_ref().ok_or_else(|| {
            SublingoError::Alignment(format!("segment {} has no split output", job.index))
        })?;
        let content = std::fs::read_to_string(no_ts_path)?;
        if content.contains(prompts::EMPTY_TRANSCRIPT_MARKER) {
            debug!(segment = job.index, "silent segment, no blocks to timestamp");
            return Ok(());
        }

        let mut blocks = srt::parse_no_timestamp_content(&content);
        if blocks.is_empty() {
            return Ok(());
        }

        let transcription = job.transcription.as_ref().ok_or_else(|| {
            SublingoError::Alignment(format!("segment {} has no transcription", job.index))
        })?;
        let word_dialect = lang::uses_word_alignment(&params.origin_lang);
        // Segment-local times map to global times at L·index, matching the
        // fixed nominal segment length regardless of where the planner
        // actually cut.
        let offset = self.config.segment_seconds * job.index as f64;

        let mut last_ts = 0.0f64;
        let mut short_map: HashMap<usize, Vec<SrtBlock>> = HashMap::new();

        for block in &mut blocks {
            if block.origin.is_empty() {
                continue;
            }
            let alignment = match align::sentence_timestamps(
                &transcription.words,
                &block.origin,
                last_ts,
                word_dialect,
            ) {
                Ok(alignment) => alignment,
                // Unalignable block: emitted without a timestamp, cursor
                // not advanced.
                Err(e) => {
                    debug!(segment = job.index, block = block.index, error = %e, "block skipped");
                    continue;
                }
            };
            if alignment.last_ts < last_ts {
                continue;
            }

            block.timestamp = srt::make_timestamp(
                alignment.timestamps.start + offset,
                alignment.timestamps.end + offset,
            );

            let fragments = short_origin_fragments(
                &alignment.words,
                alignment.timestamps,
                offset,
                last_ts,
                params.words_per_line,
                block,
            );
            short_map.insert(block.index, fragments);

            last_ts = alignment.last_ts;
        }

        let bilingual_path = workspace_dir.join(workspace::split_bilingual_file(job.index));
        srt::write_bilingual_srt(&bilingual_path, &blocks, params.policy.target_on_top())?;

        self.write_short_files(workspace_dir, job.index, &blocks, &short_map)?;
        Ok(())
    }

    fn write_short_files(
        &self,
        workspace_dir: &Path,
        segment_index: usize,
        blocks: &[SrtBlock],
        short_map: &HashMap<usize, Vec<SrtBlock>>,
    ) -> Result<()> {
        let mut mixed = String::new();
        let mut short = String::new();
        let mut mixed_num = 1usize;
        let mut short_num = 1usize;

        for block in blocks {
            mixed.push_str(&format!(
                "{mixed_num}\n{}\n{}\n\n",
                block.timestamp, block.target
            ));
            mixed_num += 1;
            let Some(fragments) = short_map.get(&block.index) else {
                continue;
            };
            for fragment in fragments {
                mixed.push_str(&format!(
                    "{mixed_num}\n{}\n{}\n\n",
                    fragment.timestamp, fragment.origin
                ));
                mixed_num += 1;
                short.push_str(&format!(
                    "{short_num}\n{}\n{}\n\n",
                    fragment.timestamp, fragment.origin
                ));
                short_num += 1;
            }
        }

        std::fs::write(
            workspace_dir.join(workspace::split_short_origin_mixed_file(segment_index)),
            mixed,
        )?;
        std::fs::write(
            workspace_dir.join(workspace::split_short_origin_file(segment_index)),
            short,
        )?;
        Ok(())
    }

    /// Alternative entry for word-timed VTT input: segment the word
    /// stream, translate with context, align, and write the merged
    /// bilingual file directly.
    pub async fn vtt_to_subtitle(
        &self,
        vtt_path: &Path,
        workspace_dir: &Path,
        params: &PipelineParams,
    ) -> Result<PipelineOutputs> {
        let words = vtt::parse_vtt_to_words(vtt_path)?;
        info!(words = words.len(), "parsed word-timed vtt");
        (self.progress)(PROGRESS_FLOOR as u8);

        // Punctuated space-separated text splits on punctuation; Asian or
        // punctuation-sparse sources need the time-aware strategies.
        let joined = words
            .iter()
            .map(|w| w.text.trim())
            .collect::<Vec<_>>()
            .join(if lang::joins_with_space(&params.origin_lang) {
                " "
            } else {
                ""
            });
        let time_aware = lang::is_asian_language(&params.origin_lang)
            || sentence::is_punctuation_sparse(&joined);
        let sentences = if time_aware {
            sentence::split_timed_words(
                &words,
                &params.origin_lang,
                self.config.max_sentence_length,
            )
        } else {
            sentence::split_by_punctuation(&joined, self.config.max_sentence_length)
        };
        let sentences = self.translator.shorten_sentences(sentences).await;
        let items = self
            .translator
            .translate_sentences(&sentences, &params.target_lang)
            .await;
        (self.progress)(70);

        let word_dialect = lang::uses_word_alignment(&params.origin_lang);
        let mut blocks = Vec::with_capacity(items.len());
        let mut last_ts = 0.0f64;
        for (i, item) in items.iter().enumerate() {
            let mut block = SrtBlock {
                index: i + 1,
                timestamp: String::new(),
                origin: item.origin.clone(),
                target: item.translated.clone(),
            };
            if let Ok(alignment) =
                align::sentence_timestamps(&words, &item.origin, last_ts, word_dialect)
            {
                if alignment.last_ts >= last_ts {
                    block.timestamp = srt::make_timestamp(
                        alignment.timestamps.start,
                        alignment.timestamps.end,
                    );
                    last_ts = alignment.last_ts;
                }
            }
            blocks.push(block);
        }

        let outputs = PipelineOutputs {
            origin_no_ts: workspace_dir.join(workspace::ORIGIN_NO_TS_FILE),
            bilingual: workspace_dir.join(workspace::BILINGUAL_FILE),
            short_origin_mixed: workspace_dir.join(workspace::SHORT_ORIGIN_MIXED_FILE),
            short_origin: workspace_dir.join(workspace::SHORT_ORIGIN_FILE),
        };
        srt::write_bilingual_srt(&outputs.bilingual, &blocks, params.policy.target_on_top())?;
        (self.progress)(PROGRESS_CEIL as u8);
        Ok(outputs)
    }
}

/// Stage A: transcribe every segment in order, with a bounded retry per
/// segment, stamping progress and handing segments downstream.
async fn transcription_stage(
    providers: Providers,
    jobs: Vec<SegmentJob>,
    origin_lang: String,
    workspace_dir: PathBuf,
    tx: mpsc::Sender<SegmentJob>,
    cancel: CancellationToken,
    step: Arc<dyn Fn() + Send + Sync>,
) -> Result<()> {
    let language = lang::normalize_asr_language(&origin_lang).to_string();

    for mut job in jobs {
        if cancel.is_cancelled() {
            return Err(SublingoError::Cancelled);
        }

        let mut transcription: Option<Transcription> = None;
        let mut last_error: Option<SublingoError> = None;
        for attempt in 0..TRANSCRIBE_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(SublingoError::Cancelled);
            }
            match providers
                .transcriber
                .transcribe(&job.audio_path, &language, &workspace_dir)
                .await
            {
                Ok(t) => {
                    transcription = Some(t);
                    break;
                }
                Err(e) => {
                    warn!(segment = job.index, attempt = attempt + 1, error = %e, "transcription attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let Some(transcription) = transcription else {
            cancel.cancel();
            let e = last_error
                .unwrap_or_else(|| SublingoError::Transcription("unknown failure".to_string()));
            error!(segment = job.index, error = %e, "transcription failed after retries");
            return Err(e);
        };

        if transcription.text.is_empty() {
            info!(segment = job.index, "segment transcribed as silence");
        }
        job.transcription = Some(transcription);
        step();

        tokio::select! {
            _ = cancel.cancelled() => return Err(SublingoError::Cancelled),
            sent = tx.send(job) => {
                if sent.is_err() {
                    return Err(SublingoError::Cancelled);
                }
            }
        }
    }
    debug!("transcription stage finished");
    Ok(())
}

/// Stage B manager: pull transcribed segments, acquire a worker slot, and
/// spawn a split-and-translate worker per segment. Does not preserve
/// order. Waits for all workers before returning so the downstream
/// channel cannot close while a writer is alive.
#[allow(clippy::too_many_arguments)]
async fn translation_stage_manager(
    translator: Arc<Translator>,
    workspace_dir: PathBuf,
    params: PipelineParams,
    mut rx: mpsc::Receiver<SegmentJob>,
    tx: mpsc::Sender<SegmentJob>,
    parallel: usize,
    cancel: CancellationToken,
    worker_error: Arc<Mutex<Option<SublingoError>>>,
    step: Arc<dyn Fn() + Send + Sync>,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut cancelled = false;

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            job = rx.recv() => job,
        };
        let Some(mut job) = job else { break };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = semaphore.clone().acquire_owned() => {
                permit.expect("semaphore closed")
            }
        };

        let translator = translator.clone();
        let workspace_dir = workspace_dir.clone();
        let params = params.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        let worker_error = worker_error.clone();
        let step = step.clone();

        workers.spawn(async move {
            let _permit = permit;
            if cancel.is_cancelled() {
                return;
            }
            let transcript = job
                .transcription
                .as_ref()
                .map(|t| t.text.clone())
                .unwrap_or_default();

            let content = match translator
                .split_and_translate(&transcript, &params.target_lang, params.modal_filter)
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    error!(segment = job.index, error = %e, "split-and-translate worker failed");
                    worker_error.lock().expect("worker error lock").get_or_insert(e);
                    cancel.cancel();
                    return;
                }
            };

            let path = workspace_dir.join(workspace::split_origin_no_ts_file(job.index));
            if let Err(e) = std::fs::write(&path, &content) {
                worker_error
                    .lock()
                    .expect("worker error lock")
                    .get_or_insert(SublingoError::Io(e));
                cancel.cancel();
                return;
            }
            job.srt_no_ts_path = Some(path);
            step();

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tx.send(job) => {}
            }
        });
    }
    drop(tx);

    // Barrier: the output channel must outlive the workers. A panicked
    // worker surfaces here and cancels the pipeline.
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "translation worker panicked");
                worker_error
                    .lock()
                    .expect("worker error lock")
                    .get_or_insert(SublingoError::Translation(format!(
                        "worker panicked: {e}"
                    )));
                cancel.cancel();
            }
        }
    }

    if cancelled {
        return Err(SublingoError::Cancelled);
    }
    debug!("translation stage manager finished");
    Ok(())
}

/// Subdivide a sentence's source line into `⌈n/k⌉`-word fragments with
/// word-accurate timestamps, for overlay styling.
fn short_origin_fragments(
    sentence_words: &[Word],
    sentence_ts: SentenceTimestamps,
    offset: f64,
    last_ts: f64,
    words_per_line: usize,
    block: &SrtBlock,
) -> Vec<SrtBlock> {
    let mut fragments = Vec::new();
    let n = sentence_words.len();

    if n <= words_per_line {
        fragments.push(SrtBlock {
            index: block.index,
            timestamp: srt::make_timestamp(sentence_ts.start + offset, sentence_ts.end + offset),
            origin: block.origin.clone(),
            target: String::new(),
        });
        return fragments;
    }

    // Even out the last line: ⌈n/k⌉ words per fragment rather than k words
    // and a remainder.
    let mut line_words = words_per_line;
    for divisor in 2..=5usize {
        if n > (divisor - 1) * words_per_line && n <= divisor * words_per_line {
            line_words = n / divisor + 1;
            break;
        }
    }

    let mut start_word: Word = Word {
        num: 0,
        text: String::new(),
        start: 0.0,
        end: 0.0,
    };
    let mut end_word = start_word.clone();
    let mut text = String::new();
    let mut next_start = true;
    let mut i = 1usize;

    for word in sentence_words {
        if next_start {
            start_word = word.clone();
            if start_word.start < last_ts {
                start_word.start = last_ts;
            }
            if start_word.start < end_word.end {
                start_word.start = end_word.end;
            }
            if start_word.start < sentence_ts.start {
                start_word.start = sentence_ts.start;
            }
            // A start word ending past the sentence is a mismatch; keep
            // its text but look for a better anchor.
            if start_word.end > sentence_ts.end {
                text.push_str(&word.text);
                text.push(' ');
                continue;
            }
            text.push_str(&word.text);
            text.push(' ');
            end_word = start_word.clone();
            i += 1;
            next_start = false;
            continue;
        }

        text.push_str(&word.text);
        text.push(' ');
        if end_word.end < word.end {
            end_word = word.clone();
        }
        if end_word.end > sentence_ts.end {
            end_word.end = sentence_ts.end;
        }

        if i % line_words == 0 && i > 1 {
            fragments.push(SrtBlock {
                index: block.index,
                timestamp: srt::make_timestamp(
                    start_word.start + offset,
                    end_word.end + offset,
                ),
                origin: text.trim().to_string(),
                target: String::new(),
            });
            text.clear();
            next_start = true;
        }
        i += 1;
    }

    if !text.trim().is_empty() {
        fragments.push(SrtBlock {
            index: block.index,
            timestamp: srt::make_timestamp(start_word.start + offset, end_word.end + offset),
            origin: text.trim().to_string(),
            target: String::new(),
        });
    }

    fragments
}
