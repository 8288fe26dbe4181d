//! Dubbing timing adapter.
//!
//! Fits synthesized speech into the subtitle timeline. Lines are grouped
//! (default four per group, with forced boundaries at >5 s gaps); a group
//! whose audio overruns its slot is merged, sped up, and its line
//! boundaries redistributed proportionally; audio that underruns is
//! padded with trailing silence.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, SublingoError};
use crate::media;
use crate::providers::SpeechSynthesizer;
use crate::srt;
use crate::workspace;

/// A gap longer than this forces a group boundary.
const GAP_BOUNDARY_SECS: f64 = 5.0;
/// Audio longer than this ratio of its subtitle slot marks the group as
/// needing merged adjustment.
const OVERRUN_RATIO: f64 = 1.2;
/// Silence padding above this, right before a forced boundary, is
/// attributed back to the preceding line's rewritten end time.
const SILENCE_ATTRIBUTION_SECS: f64 = 2.0;

/// One subtitle line as the dubbing adapter sees it.
#[derive(Debug, Clone)]
struct DubLine {
    start: f64,
    end: f64,
    text: String,
}

/// Results of a dubbing run.
#[derive(Debug, Clone)]
pub struct DubbingOutputs {
    /// Concatenated speech track approximating the subtitle timeline.
    pub audio: PathBuf,
    /// The subtitle file rewritten to the actual clip timing.
    pub srt: PathBuf,
    /// Video with its audio track replaced, when a video was supplied.
    pub video: Option<PathBuf>,
}

/// Synthesize and time-fit a dubbed audio track for a bilingual SRT.
pub async fn srt_to_speech(
    tts: &dyn SpeechSynthesizer,
    config: &Config,
    workspace_dir: &Path,
    bilingual_srt: &Path,
    target_on_top: bool,
    voice: &str,
    video: Option<&Path>,
) -> Result<DubbingOutputs> {
    let blocks = srt::parse_bilingual_srt(bilingual_srt, target_on_top)?;
    let mut lines = Vec::with_capacity(blocks.len());
    for block in &blocks {
        if block.target.is_empty() || block.timestamp.is_empty() {
            continue;
        }
        let (start, end) = srt::parse_timestamp_line(&block.timestamp)?;
        lines.push(DubLine {
            start,
            end,
            text: block.target.clone(),
        });
    }
    if lines.is_empty() {
        return Err(SublingoError::Tts(
            "no dubbable lines in subtitle file".to_string(),
        ));
    }

    // Raw synthesis, one clip per line.
    let mut clip_files = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let clip = workspace_dir.join(workspace::tts_line_file(i));
        tts.synthesize(&line.text, voice, &clip).await?;
        clip_files.push(clip);
    }
    info!(lines = lines.len(), "synthesized raw speech clips");

    let (processed, rewritten) =
        fit_groups_to_timeline(config, workspace_dir, &clip_files, lines)?;

    let final_audio = workspace_dir.join(workspace::TTS_FINAL_AUDIO_FILE);
    media::concat_audio(
        &config.ffmpeg_path,
        &processed,
        &final_audio,
        workspace_dir,
        false,
    )?;

    let srt_path = workspace_dir.join(workspace::TTS_SRT_FILE);
    write_rewritten_srt(&srt_path, &rewritten)?;

    let video_out = match video {
        Some(video_path) => {
            let ext = video_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("mp4");
            let out = workspace_dir.join(workspace::tts_output_video_file(ext));
            media::replace_audio_in_video(&config.ffmpeg_path, video_path, &final_audio, &out)?;
            Some(out)
        }
        None => None,
    };

    Ok(DubbingOutputs {
        audio: final_audio,
        srt: srt_path,
        video: video_out,
    })
}

/// Group clips, fit each group to its slot in the subtitle timeline, and
/// return the processed clip list plus the rewritten line timings.
fn fit_groups_to_timeline(
    config: &Config,
    workspace_dir: &Path,
    clip_files: &[PathBuf],
    mut lines: Vec<DubLine>,
) -> Result<(Vec<PathBuf>, Vec<DubLine>)> {
    let ffmpeg = &config.ffmpeg_path;
    let ffprobe = &config.ffprobe_path;
    let group_size = config.tts_group_size.max(1);

    // Pre-scan: a gap over five seconds forces a boundary and the
    // preceding line's slot is stretched to cover the gap.
    let mut forced_boundary = vec![false; lines.len() + 1];
    for i in 0..lines.len().saturating_sub(1) {
        if lines[i + 1].start - lines[i].end > GAP_BOUNDARY_SECS {
            forced_boundary[i + 1] = true;
            lines[i].end = lines[i + 1].start;
        }
    }

    let mut processed: Vec<PathBuf> = Vec::new();
    let mut rewritten = lines.clone();

    // A first line not at t=0 gets a leading silence clip.
    if lines[0].start > 0.0 {
        let silence = workspace_dir.join(workspace::TTS_SILENCE_FILE);
        media::generate_silence(ffmpeg, &silence, lines[0].start)?;
        processed.push(silence);
    }

    let mut begin = 0usize;
    while begin < clip_files.len() {
        let mut end = (begin + group_size).min(clip_files.len());
        for j in begin + 1..end {
            if forced_boundary[j] {
                end = j;
                break;
            }
        }

        let group_clips = &clip_files[begin..end];
        let group_lines = &lines[begin..end];
        let needs_merge = group_needs_adjustment(ffprobe, group_clips, group_lines)?;

        if needs_merge {
            let merged = workspace_dir.join(workspace::tts_group_file(begin, end));
            media::concat_audio(ffmpeg, group_clips, &merged, workspace_dir, false)?;

            let mut clip_durations = Vec::with_capacity(group_clips.len());
            let mut total = 0.0f64;
            for clip in group_clips {
                let d = media::audio_duration(ffprobe, clip)?;
                clip_durations.push(d);
                total += d;
            }

            // Rewrite line boundaries to the actual clip lengths.
            let group_start = group_lines[0].start;
            let mut cursor = group_start;
            for (j, d) in clip_durations.iter().enumerate() {
                rewritten[begin + j].start = cursor;
                cursor += d;
                rewritten[begin + j].end = cursor;
            }

            let target = group_target_duration(&lines, begin, end);
            if total > target {
                // The merged clip will be sped up; compress the rewritten
                // boundaries by the same factor.
                let factor = total / target;
                let mut cursor = group_start;
                for (j, d) in clip_durations.iter().enumerate() {
                    rewritten[begin + j].start = cursor;
                    cursor += d / factor;
                    rewritten[begin + j].end = cursor;
                }
            }

            let adjusted = with_suffix(&merged, "adjusted");
            let silence_added = media::adjust_audio_duration(
                ffmpeg,
                ffprobe,
                &merged,
                &adjusted,
                workspace_dir,
                target,
            )?;
            if silence_added > SILENCE_ATTRIBUTION_SECS && forced_boundary_at(&forced_boundary, end)
            {
                let last = end - 1;
                rewritten[last].end -= silence_added;
            }
            processed.push(adjusted);
        } else {
            for (j, clip) in group_clips.iter().enumerate() {
                let idx = begin + j;
                let target = group_target_duration(&lines, idx, idx + 1);
                let adjusted = with_suffix(clip, "adjusted");
                let silence_added = media::adjust_audio_duration(
                    ffmpeg,
                    ffprobe,
                    clip,
                    &adjusted,
                    workspace_dir,
                    target,
                )?;
                if silence_added > SILENCE_ATTRIBUTION_SECS
                    && forced_boundary_at(&forced_boundary, end)
                {
                    rewritten[idx].end -= silence_added;
                }
                processed.push(adjusted);
            }
        }

        begin = end;
    }

    Ok((processed, rewritten))
}

fn forced_boundary_at(forced: &[bool], index: usize) -> bool {
    forced.get(index).copied().unwrap_or(false)
}

/// Whether any clip in the group overruns its subtitle slot by more than
/// the tolerated ratio.
fn group_needs_adjustment(
    ffprobe: &str,
    clips: &[PathBuf],
    lines: &[DubLine],
) -> Result<bool> {
    for (clip, line) in clips.iter().zip(lines) {
        let audio = media::audio_duration(ffprobe, clip)?;
        let slot = line.end - line.start;
        if audio > slot * OVERRUN_RATIO {
            debug!(audio, slot, "clip overruns its subtitle slot");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Target duration for lines `[begin, end)`: from the first line's start
/// to the next line's start, or to the last line's end at EOF.
fn group_target_duration(lines: &[DubLine], begin: usize, end: usize) -> f64 {
    let start = lines[begin].start;
    let stop = if end < lines.len() {
        lines[end].start
    } else {
        lines[end - 1].end
    };
    stop - start
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("clip");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("wav");
    path.with_file_name(format!("{stem}_{suffix}.{ext}"))
}

fn write_rewritten_srt(path: &Path, lines: &[DubLine]) -> Result<()> {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{}\n{}\n\n",
            i + 1,
            srt::make_timestamp(line.start, line.end),
            line.text
        ));
    }
    std::fs::write(path, out)?;
    Ok(())
}
