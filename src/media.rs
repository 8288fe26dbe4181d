//! Thin wrappers over the ffmpeg/ffprobe command line tools.
//!
//! Every function shells out and surfaces failures as opaque media errors;
//! callers decide whether a failure is fatal for the task.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Result, SublingoError};

/// Sample rate used when streaming PCM for energy analysis.
pub const PLAN_SAMPLE_RATE: u32 = 3000;

/// Check that ffmpeg is installed and runnable.
pub fn check_ffmpeg(ffmpeg: &str) -> Result<()> {
    let output = Command::new(ffmpeg).arg("-version").output().map_err(|e| {
        SublingoError::Media(format!(
            "ffmpeg not found at '{ffmpeg}'. Install FFmpeg and ensure it is on PATH. Error: {e}"
        ))
    })?;
    if !output.status.success() {
        return Err(SublingoError::Media("ffmpeg check failed".to_string()));
    }
    debug!("ffmpeg is available");
    Ok(())
}

/// Check that ffprobe is installed and runnable.
pub fn check_ffprobe(ffprobe: &str) -> Result<()> {
    let output = Command::new(ffprobe).arg("-version").output().map_err(|e| {
        SublingoError::Media(format!(
            "ffprobe not found at '{ffprobe}'. Install FFmpeg (includes ffprobe). Error: {e}"
        ))
    })?;
    if !output.status.success() {
        return Err(SublingoError::Media("ffprobe check failed".to_string()));
    }
    Ok(())
}

/// Total duration of an audio file in seconds.
pub fn probe_duration(ffprobe: &str, input: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|e| SublingoError::Media(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SublingoError::Media(format!("ffprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    duration_str.trim().parse().map_err(|e| {
        SublingoError::Media(format!(
            "failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })
}

/// Duration of a WAV file read from its header, without spawning ffprobe.
pub fn wav_duration(input: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(input)
        .map_err(|e| SublingoError::Media(format!("failed to open wav {}: {e}", input.display())))?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Duration dispatch: WAV via header, everything else via ffprobe.
pub fn audio_duration(ffprobe: &str, input: &Path) -> Result<f64> {
    if input.extension().and_then(|e| e.to_str()) == Some("wav") {
        wav_duration(input)
    } else {
        probe_duration(ffprobe, input)
    }
}

/// Spawn ffmpeg streaming a band-passed mono PCM window to stdout.
///
/// Output is little-endian signed 16-bit at [`PLAN_SAMPLE_RATE`], filtered
/// to roughly the speech band so energy minima track pauses, not rumble.
pub fn spawn_pcm_stream(ffmpeg: &str, input: &Path, start: f64, end: f64) -> Result<Child> {
    if start < 0.0 || end <= start {
        return Err(SublingoError::Media(format!(
            "invalid pcm window: start={start}, end={end}"
        )));
    }
    Command::new(ffmpeg)
        .args(["-y", "-ss", &format!("{start:.3}"), "-to", &format!("{end:.3}"), "-i"])
        .arg(input)
        .args([
            "-f",
            "s16le",
            "-ar",
            &PLAN_SAMPLE_RATE.to_string(),
            "-ac",
            "1",
            "-af",
            "lowpass=f=3000,highpass=f=300",
            "pipe:1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SublingoError::Media(format!("failed to spawn ffmpeg pcm stream: {e}")))
}

/// Losslessly clip `[start, end)` out of an audio file.
pub fn clip_audio(ffmpeg: &str, input: &Path, output: &Path, start: f64, end: f64) -> Result<()> {
    if start < 0.0 || end <= start {
        return Err(SublingoError::Media(format!(
            "invalid clip range: start={start}, end={end}"
        )));
    }
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-ss", &format!("{start:.3}"), "-to", &format!("{end:.3}"), "-i"])
            .arg(input)
            .args(["-c:a", "copy"])
            .arg(output),
        "clip audio",
    )
}

/// Split an audio file into numbered pieces of at most `seconds` each.
///
/// `output_pattern` must contain a printf-style `%d`.
pub fn segment_by_duration(
    ffmpeg: &str,
    input: &Path,
    output_pattern: &Path,
    seconds: f64,
) -> Result<()> {
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-i"])
            .arg(input)
            .args([
                "-f",
                "segment",
                "-segment_time",
                &format!("{seconds:.0}"),
                "-reset_timestamps",
                "1",
            ])
            .arg(output_pattern),
        "segment audio",
    )
}

/// Extract or normalize the audio track of any media file into mp3.
pub fn extract_audio(ffmpeg: &str, input: &Path, output: &Path) -> Result<()> {
    if !input.exists() {
        return Err(SublingoError::FileNotFound(input.display().to_string()));
    }
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", "libmp3lame", "-q:a", "2"])
            .arg(output),
        "extract audio",
    )
}

/// Concatenate audio files in order into one output.
///
/// With `reencode_pcm` the result is re-encoded to 16-bit PCM, otherwise
/// streams are copied. The concat list references files by base name, so
/// all inputs must live in `base_dir`.
pub fn concat_audio(
    ffmpeg: &str,
    files: &[std::path::PathBuf],
    output: &Path,
    base_dir: &Path,
    reencode_pcm: bool,
) -> Result<()> {
    let list_file = base_dir.join("audio_list.txt");
    let mut list = String::new();
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SublingoError::Media(format!("bad concat entry: {}", file.display())))?;
        list.push_str(&format!("file '{name}'\n"));
    }
    std::fs::write(&list_file, list)?;

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-f", "concat", "-safe", "0", "-i"]).arg(&list_file);
    if reencode_pcm {
        cmd.args(["-c:a", "pcm_s16le"]);
    } else {
        cmd.args(["-c", "copy"]);
    }
    cmd.arg(output);
    let result = run_ffmpeg(&mut cmd, "concatenate audio");
    let _ = std::fs::remove_file(&list_file);
    result
}

/// Apply a tempo factor to an audio file.
///
/// Factors above 1.3 are audibly rushed; log and continue.
pub fn retime_audio(ffmpeg: &str, input: &Path, output: &Path, factor: f64) -> Result<()> {
    if !(0.5..=2.0).contains(&factor) {
        warn!(factor, "tempo factor outside ffmpeg's single-filter range");
    } else if factor > 1.3 {
        warn!(factor, "tempo factor above 1.3, dubbing may sound rushed");
    }
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-i"])
            .arg(input)
            .args(["-filter:a", &format!("atempo={factor:.2}")])
            .arg(output),
        "retime audio",
    )
}

/// Write a mono PCM silence file of the requested duration.
pub fn generate_silence(ffmpeg: &str, output: &Path, duration: f64) -> Result<()> {
    run_ffmpeg(
        Command::new(ffmpeg)
            .args([
                "-y",
                "-f",
                "lavfi",
                "-i",
                "anullsrc=channel_layout=mono:sample_rate=44100",
                "-t",
                &format!("{duration:.3}"),
                "-ar",
                "44100",
                "-ac",
                "1",
                "-c:a",
                "pcm_s16le",
            ])
            .arg(output),
        "generate silence",
    )
}

/// Mux the video stream of `video` with the audio stream of `audio`.
pub fn replace_audio_in_video(
    ffmpeg: &str,
    video: &Path,
    audio: &Path,
    output: &Path,
) -> Result<()> {
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-i"])
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-map", "0:v:0", "-map", "1:a:0"])
            .arg(output),
        "replace audio in video",
    )
}

/// Overlay two audio tracks into one.
pub fn mix_audio(ffmpeg: &str, first: &Path, second: &Path, output: &Path) -> Result<()> {
    run_ffmpeg(
        Command::new(ffmpeg)
            .args(["-y", "-i"])
            .arg(first)
            .arg("-i")
            .arg(second)
            .args(["-filter_complex", "amix=inputs=2:duration=longest"])
            .arg(output),
        "mix audio",
    )
}

/// Fit an audio file to a target duration.
///
/// Shorter audio is padded with trailing silence; longer audio is sped up
/// by `actual / target`. Returns the silence duration that was appended
/// (0.0 when the audio was retimed or copied unchanged).
pub fn adjust_audio_duration(
    ffmpeg: &str,
    ffprobe: &str,
    input: &Path,
    output: &Path,
    base_dir: &Path,
    target: f64,
) -> Result<f64> {
    let actual = audio_duration(ffprobe, input)?;

    if actual < target {
        let silence_duration = target - actual;
        let silence_file = base_dir.join("silence.wav");
        generate_silence(ffmpeg, &silence_file, silence_duration)?;
        concat_audio(
            ffmpeg,
            &[input.to_path_buf(), silence_file],
            output,
            base_dir,
            false,
        )?;
        return Ok(silence_duration);
    }

    if actual > target {
        let factor = actual / target;
        retime_audio(ffmpeg, input, output, factor)?;
        return Ok(0.0);
    }

    std::fs::copy(input, output)?;
    Ok(0.0)
}

fn run_ffmpeg(cmd: &mut Command, what: &str) -> Result<()> {
    debug!(?cmd, "running ffmpeg");
    let output = cmd
        .output()
        .map_err(|e| SublingoError::Media(format!("failed to run ffmpeg ({what}): {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(4).collect::<Vec<_>>().join(" | ");
        return Err(SublingoError::Media(format!("{what} failed: {tail}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_spawn_pcm_stream_rejects_bad_range() {
        let result = spawn_pcm_stream("ffmpeg", &PathBuf::from("/tmp/a.mp3"), 10.0, 5.0);
        assert!(result.is_err());
        let result = spawn_pcm_stream("ffmpeg", &PathBuf::from("/tmp/a.mp3"), -1.0, 5.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_clip_audio_rejects_bad_range() {
        let result = clip_audio(
            "ffmpeg",
            &PathBuf::from("/tmp/a.mp3"),
            &PathBuf::from("/tmp/b.mp3"),
            5.0,
            5.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_audio_missing_input() {
        let result = extract_audio(
            "ffmpeg",
            &PathBuf::from("/nonexistent/clip.mp4"),
            &PathBuf::from("/tmp/out.mp3"),
        );
        match result {
            Err(SublingoError::FileNotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_wav_duration_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..8000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let duration = wav_duration(&path).unwrap();
        assert!((duration - 1.0).abs() < 0.001);
    }
}
