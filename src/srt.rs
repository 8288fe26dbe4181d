//! SRT reading, writing, merging, and splitting.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::error::{Result, SublingoError};

/// Which subtitle files a task produces and how bilingual blocks are laid
/// out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitlePolicy {
    OriginOnly,
    TargetOnly,
    BilingualTop,
    BilingualBottom,
}

impl SubtitlePolicy {
    pub fn target_on_top(&self) -> bool {
        matches!(self, SubtitlePolicy::BilingualTop)
    }

    pub fn wants_target_file(&self) -> bool {
        !matches!(self, SubtitlePolicy::OriginOnly)
    }

    pub fn wants_bilingual_file(&self) -> bool {
        matches!(
            self,
            SubtitlePolicy::BilingualTop | SubtitlePolicy::BilingualBottom
        )
    }
}

impl fmt::Display for SubtitlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubtitlePolicy::OriginOnly => "origin-only",
            SubtitlePolicy::TargetOnly => "target-only",
            SubtitlePolicy::BilingualTop => "bilingual-top",
            SubtitlePolicy::BilingualBottom => "bilingual-bottom",
        };
        write!(f, "{name}")
    }
}

impl FromStr for SubtitlePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "origin-only" | "origin" => Ok(SubtitlePolicy::OriginOnly),
            "target-only" | "target" => Ok(SubtitlePolicy::TargetOnly),
            "bilingual-top" | "top" => Ok(SubtitlePolicy::BilingualTop),
            "bilingual-bottom" | "bottom" | "bilingual" => Ok(SubtitlePolicy::BilingualBottom),
            other => Err(format!(
                "unknown subtitle policy '{other}'. Use origin-only, target-only, bilingual-top, or bilingual-bottom"
            )),
        }
    }
}

/// One subtitle record. `timestamp` stays empty when alignment failed for
/// the sentence; writers emit the empty line unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SrtBlock {
    pub index: usize,
    pub timestamp: String,
    pub origin: String,
    pub target: String,
}

/// A produced subtitle artifact, recorded on the task after merge.
#[derive(Debug, Clone)]
pub struct SubtitleFileInfo {
    pub path: PathBuf,
    pub language: String,
    pub name: String,
}

/// Seconds to `HH:MM:SS,mmm`.
pub fn format_time(seconds: f64) -> String {
    let clamped = seconds.max(0.0);
    let total_millis = (clamped * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// `HH:MM:SS,mmm` (or the VTT `.` variant) to seconds.
pub fn parse_time(text: &str) -> Result<f64> {
    let normalized = text.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    let (h, m, rest) = match parts.as_slice() {
        [h, m, rest] => (
            h.parse::<u64>().map_err(bad_time(text))?,
            m.parse::<u64>().map_err(bad_time(text))?,
            rest,
        ),
        [m, rest] => (0, m.parse::<u64>().map_err(bad_time(text))?, rest),
        _ => return Err(SublingoError::SrtParse(format!("bad time '{text}'"))),
    };
    let sec_parts: Vec<&str> = rest.split('.').collect();
    let (s, ms) = match sec_parts.as_slice() {
        [s, ms] => (
            s.parse::<u64>().map_err(bad_time(text))?,
            ms.parse::<u64>().map_err(bad_time(text))?,
        ),
        [s] => (s.parse::<u64>().map_err(bad_time(text))?, 0),
        _ => return Err(SublingoError::SrtParse(format!("bad time '{text}'"))),
    };
    Ok(h as f64 * 3600.0 + m as f64 * 60.0 + s as f64 + ms as f64 / 1000.0)
}

fn bad_time(text: &str) -> impl Fn(std::num::ParseIntError) -> SublingoError + '_ {
    move |e| SublingoError::SrtParse(format!("bad time '{text}': {e}"))
}

pub fn make_timestamp(start: f64, end: f64) -> String {
    format!("{} --> {}", format_time(start), format_time(end))
}

/// Parse an `HH:MM:SS,mmm --> HH:MM:SS,mmm` line.
pub fn parse_timestamp_line(line: &str) -> Result<(f64, f64)> {
    let mut parts = line.splitn(2, "-->");
    let start = parts
        .next()
        .ok_or_else(|| SublingoError::SrtParse(format!("bad timestamp line '{line}'")))?;
    let end = parts
        .next()
        .ok_or_else(|| SublingoError::SrtParse(format!("bad timestamp line '{line}'")))?;
    Ok((parse_time(start)?, parse_time(end)?))
}

fn is_timestamp_line(line: &str) -> bool {
    line.contains("-->")
}

/// Raw blocks: index, optional timestamp line, remaining text lines.
/// Tolerates a trailing block without a terminating blank line.
fn read_raw_blocks(content: &str) -> Vec<(usize, String, Vec<String>)> {
    let mut blocks = Vec::new();
    let mut lines: Vec<String> = Vec::new();

    let flush = |lines: &mut Vec<String>, blocks: &mut Vec<(usize, String, Vec<String>)>| {
        if lines.is_empty() {
            return;
        }
        let mut iter = lines.drain(..);
        let index_line = iter.next().unwrap_or_default();
        let index = index_line.trim().parse::<usize>().unwrap_or(0);
        let mut timestamp = String::new();
        let mut text = Vec::new();
        for line in iter {
            if timestamp.is_empty() && text.is_empty() && is_timestamp_line(&line) {
                timestamp = line.trim().to_string();
            } else if timestamp.is_empty() && text.is_empty() && line.trim().is_empty() {
                // An empty timestamp slot from a failed alignment.
                timestamp = String::new();
            } else {
                text.push(line.trim().to_string());
            }
        }
        blocks.push((index, timestamp, text));
    };

    for line in content.lines() {
        if line.trim().is_empty() && !lines.is_empty() && lines.len() >= 2 {
            flush(&mut lines, &mut blocks);
        } else if !line.trim().is_empty() || !lines.is_empty() {
            lines.push(line.to_string());
        }
    }
    flush(&mut lines, &mut blocks);
    blocks
}

/// Parse a bilingual SRT, assigning first/second text lines per layout.
pub fn parse_bilingual_srt(path: &Path, target_on_top: bool) -> Result<Vec<SrtBlock>> {
    let content = std::fs::read_to_string(path)?;
    let mut blocks = Vec::new();
    for (index, timestamp, text) in read_raw_blocks(&content) {
        let first = text.first().cloned().unwrap_or_default();
        let second = text.get(1).cloned().unwrap_or_default();
        let (origin, target) = if target_on_top {
            (second, first)
        } else {
            (first, second)
        };
        blocks.push(SrtBlock {
            index,
            timestamp,
            origin,
            target,
        });
    }
    Ok(blocks)
}

/// Parse the no-timestamp per-segment file produced by split-and-translate:
/// `<n>\n[translated]\n[original]\n\n`. Square brackets are stripped.
pub fn parse_no_timestamp_srt(path: &Path) -> Result<Vec<SrtBlock>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_no_timestamp_content(&content))
}

pub fn parse_no_timestamp_content(content: &str) -> Vec<SrtBlock> {
    let mut blocks = Vec::new();
    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(index) = trimmed.parse::<usize>() else {
            continue;
        };
        let target = lines.next().map(strip_brackets).unwrap_or_default();
        let origin = lines.next().map(strip_brackets).unwrap_or_default();
        blocks.push(SrtBlock {
            index,
            timestamp: String::new(),
            origin,
            target,
        });
    }
    blocks
}

fn strip_brackets(line: &str) -> String {
    line.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_string()
}

/// Write blocks with the bilingual two-line layout.
pub fn write_bilingual_srt(path: &Path, blocks: &[SrtBlock], target_on_top: bool) -> Result<()> {
    let mut out = String::new();
    for block in blocks {
        out.push_str(&format!("{}\n{}\n", block.index, block.timestamp));
        if target_on_top {
            out.push_str(&format!("{}\n{}\n\n", block.target, block.origin));
        } else {
            out.push_str(&format!("{}\n{}\n\n", block.origin, block.target));
        }
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Concatenate SRT files in order, renumbering blocks densely from 1 and
/// clamping any overlap between adjacent timestamped blocks. Missing
/// inputs are warned about and skipped.
pub fn merge_srt_files(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut out = String::new();
    let mut next_index = 1usize;
    let mut pending: Vec<(String, Vec<String>)> = Vec::new();

    for input in inputs {
        if !input.exists() {
            warn!(path = %input.display(), "skipping missing file during merge");
            continue;
        }
        let content = std::fs::read_to_string(input)?;
        for (_, timestamp, text) in read_raw_blocks(&content) {
            pending.push((timestamp, text));
        }
    }

    // Overlap fix runs over the concatenated timeline before writing.
    let mut parsed: Vec<(Option<(f64, f64)>, String, Vec<String>)> = Vec::new();
    for (timestamp, text) in pending {
        let times = parse_timestamp_line(&timestamp).ok();
        parsed.push((times, timestamp, text));
    }
    for i in 0..parsed.len() {
        let next_start = parsed
            .get(i + 1)
            .and_then(|(times, _, _)| times.map(|(s, _)| s));
        if let (Some((start, end)), Some(next_start)) = (parsed[i].0, next_start) {
            if end > next_start && next_start > start {
                parsed[i].0 = Some((start, next_start));
                parsed[i].1 = make_timestamp(start, next_start);
            }
        }
    }

    for (_, timestamp, text) in parsed {
        out.push_str(&format!("{next_index}\n{timestamp}\n"));
        for line in &text {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        next_index += 1;
    }

    std::fs::write(output, out)?;
    Ok(())
}

/// Concatenate plain files in order, skipping missing ones with a warning.
pub fn merge_plain_files(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let mut out = String::new();
    for input in inputs {
        if !input.exists() {
            warn!(path = %input.display(), "skipping missing file during merge");
            continue;
        }
        out.push_str(&std::fs::read_to_string(input)?);
    }
    std::fs::write(output, out)?;
    Ok(())
}

/// Outputs of splitting a bilingual SRT into monolingual artifacts.
pub struct SplitOutputs {
    pub origin_srt: PathBuf,
    pub origin_txt: PathBuf,
    pub target_srt: PathBuf,
    pub target_txt: PathBuf,
}

/// Split a bilingual SRT into monolingual SRTs plus plain-text transcripts
/// (no index, no timestamp). Tolerant of a trailing non-terminated block.
pub fn split_bilingual_srt(
    bilingual: &Path,
    workspace: &Path,
    target_on_top: bool,
) -> Result<SplitOutputs> {
    let outputs = SplitOutputs {
        origin_srt: workspace.join("origin.srt"),
        origin_txt: workspace.join("output").join("origin.txt"),
        target_srt: workspace.join("target.srt"),
        target_txt: workspace.join("output").join("target.txt"),
    };
    std::fs::create_dir_all(workspace.join("output"))?;

    let blocks = parse_bilingual_srt(bilingual, target_on_top)?;

    let mut origin_srt = String::new();
    let mut origin_txt = String::new();
    let mut target_srt = String::new();
    let mut target_txt = String::new();
    for block in &blocks {
        origin_srt.push_str(&format!(
            "{}\n{}\n{}\n\n",
            block.index, block.timestamp, block.origin
        ));
        target_srt.push_str(&format!(
            "{}\n{}\n{}\n\n",
            block.index, block.timestamp, block.target
        ));
        if !block.origin.is_empty() {
            origin_txt.push_str(&block.origin);
            origin_txt.push('\n');
        }
        if !block.target.is_empty() {
            target_txt.push_str(&block.target);
            target_txt.push('\n');
        }
    }

    std::fs::write(&outputs.origin_srt, origin_srt)?;
    std::fs::write(&outputs.origin_txt, origin_txt)?;
    std::fs::write(&outputs.target_srt, target_srt)?;
    std::fs::write(&outputs.target_txt, target_txt)?;
    Ok(outputs)
}

/// Apply the `before -> after` replacement table line-by-line, writing the
/// result to `dst`.
pub fn replace_words_in_file(src: &Path, dst: &Path, table: &[(String, String)]) -> Result<()> {
    let content = std::fs::read_to_string(src)?;
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let mut replaced = line.to_string();
        for (before, after) in table {
            replaced = replaced.replace(before, after);
        }
        out.push_str(&replaced);
        out.push('\n');
    }
    std::fs::write(dst, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(1.5), "00:00:01,500");
        assert_eq!(format_time(3661.123), "01:01:01,123");
        assert_eq!(format_time(-2.0), "00:00:00,000");
    }

    #[test]
    fn test_parse_time_roundtrip() {
        for value in [0.0, 1.5, 59.999, 3661.123, 7322.001] {
            let text = format_time(value);
            let parsed = parse_time(&text).unwrap();
            assert!((parsed - value).abs() < 0.001, "{value} -> {text} -> {parsed}");
        }
    }

    #[test]
    fn test_parse_time_vtt_style() {
        assert!((parse_time("00:01:02.500").unwrap() - 62.5).abs() < 0.001);
        assert!((parse_time("01:02.500").unwrap() - 62.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_timestamp_line() {
        let (start, end) = parse_timestamp_line("00:00:01,000 --> 00:00:02,500").unwrap();
        assert!((start - 1.0).abs() < 0.001);
        assert!((end - 2.5).abs() < 0.001);
        assert!(parse_timestamp_line("garbage").is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "bilingual-top".parse::<SubtitlePolicy>().unwrap(),
            SubtitlePolicy::BilingualTop
        );
        assert_eq!(
            "origin".parse::<SubtitlePolicy>().unwrap(),
            SubtitlePolicy::OriginOnly
        );
        assert!("sideways".parse::<SubtitlePolicy>().is_err());
    }

    fn sample_blocks() -> Vec<SrtBlock> {
        vec![
            SrtBlock {
                index: 1,
                timestamp: make_timestamp(0.0, 2.0),
                origin: "Hello world".to_string(),
                target: "你好世界".to_string(),
            },
            SrtBlock {
                index: 2,
                timestamp: make_timestamp(2.5, 4.0),
                origin: "Goodbye".to_string(),
                target: "再见".to_string(),
            },
        ]
    }

    #[test]
    fn test_write_parse_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bilingual.srt");
        let blocks = sample_blocks();
        write_bilingual_srt(&path, &blocks, false).unwrap();
        let parsed = parse_bilingual_srt(&path, false).unwrap();
        assert_eq!(parsed, blocks);
    }

    #[test]
    fn test_parse_respects_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bilingual.srt");
        write_bilingual_srt(&path, &sample_blocks(), true).unwrap();
        let parsed = parse_bilingual_srt(&path, true).unwrap();
        assert_eq!(parsed[0].origin, "Hello world");
        assert_eq!(parsed[0].target, "你好世界");
    }

    #[test]
    fn test_parse_tolerates_trailing_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trailing.srt");
        std::fs::write(
            &path,
            "1\n00:00:00,000 --> 00:00:01,000\nfirst\n翻译一\n\n2\n00:00:01,000 --> 00:00:02,000\nsecond\n翻译二",
        )
        .unwrap();
        let parsed = parse_bilingual_srt(&path, false).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].origin, "second");
        assert_eq!(parsed[1].target, "翻译二");
    }

    #[test]
    fn test_parse_no_timestamp_content() {
        let content = "1\n[你好]\n[Hello]\n\n2\n再见\nGoodbye\n\n";
        let blocks = parse_no_timestamp_content(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].target, "你好");
        assert_eq!(blocks[0].origin, "Hello");
        assert_eq!(blocks[1].target, "再见");
        assert!(blocks[0].timestamp.is_empty());
    }

    #[test]
    fn test_merge_renumbers_and_skips_missing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.srt");
        let b = dir.path().join("b.srt");
        let missing = dir.path().join("missing.srt");
        std::fs::write(&a, "1\n00:00:00,000 --> 00:00:01,000\nfirst\nA\n\n").unwrap();
        std::fs::write(&b, "1\n00:00:02,000 --> 00:00:03,000\nsecond\nB\n\n").unwrap();

        let output = dir.path().join("merged.srt");
        merge_srt_files(&output, &[a, missing, b]).unwrap();

        let blocks = parse_bilingual_srt(&output, false).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 1);
        assert_eq!(blocks[1].index, 2);
        assert_eq!(blocks[1].origin, "second");
    }

    #[test]
    fn test_merge_fixes_overlap() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.srt");
        std::fs::write(
            &a,
            "1\n00:00:00,000 --> 00:00:03,000\nfirst\nA\n\n2\n00:00:02,000 --> 00:00:04,000\nsecond\nB\n\n",
        )
        .unwrap();
        let output = dir.path().join("merged.srt");
        merge_srt_files(&output, &[a]).unwrap();

        let blocks = parse_bilingual_srt(&output, false).unwrap();
        let (_, end_first) = parse_timestamp_line(&blocks[0].timestamp).unwrap();
        let (start_second, _) = parse_timestamp_line(&blocks[1].timestamp).unwrap();
        assert!(end_first <= start_second);
    }

    #[test]
    fn test_split_bilingual() {
        let dir = tempdir().unwrap();
        let bilingual = dir.path().join("bilingual.srt");
        write_bilingual_srt(&bilingual, &sample_blocks(), false).unwrap();

        let outputs = split_bilingual_srt(&bilingual, dir.path(), false).unwrap();
        let origin = std::fs::read_to_string(&outputs.origin_srt).unwrap();
        let target = std::fs::read_to_string(&outputs.target_srt).unwrap();
        let origin_txt = std::fs::read_to_string(&outputs.origin_txt).unwrap();

        assert!(origin.contains("Hello world"));
        assert!(!origin.contains("你好世界"));
        assert!(target.contains("你好世界"));
        assert!(!target.contains("Hello world"));
        assert_eq!(origin_txt, "Hello world\nGoodbye\n");
    }

    #[test]
    fn test_replace_words() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.srt");
        let dst = dir.path().join("dst.srt");
        std::fs::write(&src, "1\nfoo speaks\nfoo again\n").unwrap();
        let table = vec![("foo".to_string(), "bar".to_string())];
        replace_words_in_file(&src, &dst, &table).unwrap();
        let replaced = std::fs::read_to_string(&dst).unwrap();
        assert_eq!(replaced, "1\nbar speaks\nbar again\n");
    }
}
