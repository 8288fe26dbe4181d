//! Word-level WEBVTT parsing.
//!
//! Auto-generated captions carry inline `<HH:MM:SS.mmm>` tags between
//! words; this module flattens them into the same word stream the ASR
//! providers produce, so the aligner and segmenter work unchanged.

use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::Result;
use crate::providers::Word;
use crate::srt::parse_time;

/// Parse a VTT file into an ordered word stream.
pub fn parse_vtt_to_words(path: &Path) -> Result<Vec<Word>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_vtt_content(&content))
}

pub fn parse_vtt_content(content: &str) -> Vec<Word> {
    let timestamp_line = Regex::new(
        r"^((?:\d{2}:)?\d{2}:\d{2}\.\d{3})\s-->\s((?:\d{2}:)?\d{2}:\d{2}\.\d{3})",
    )
    .expect("valid regex");
    let word_time = Regex::new(r"<((?:\d{2}:)?\d{2}:\d{2}\.\d{3})>").expect("valid regex");
    let style_tag = Regex::new(r"</?c[^>]*>").expect("valid regex");

    let mut words: Vec<Word> = Vec::new();
    let mut block_start = 0.0f64;
    let mut block_end = 0.0f64;
    let mut num = 0usize;

    for line in content.lines() {
        if let Some(caps) = timestamp_line.captures(line) {
            match (parse_time(&caps[1]), parse_time(&caps[2])) {
                (Ok(start), Ok(end)) => {
                    block_start = start;
                    block_end = end;
                }
                _ => warn!(line, "unparsable vtt block timestamp"),
            }
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("WEBVTT")
            || trimmed.starts_with("Kind:")
            || trimmed.starts_with("Language:")
        {
            continue;
        }
        if !word_time.is_match(line) {
            continue;
        }

        let cleaned = style_tag.replace_all(line, "");
        let times: Vec<f64> = word_time
            .captures_iter(&cleaned)
            .filter_map(|c| parse_time(&c[1]).ok())
            .collect();
        let parts: Vec<&str> = word_time.split(&cleaned).collect();

        let mut last_time = block_start;
        for (i, part) in parts.iter().enumerate() {
            let text = part.trim();
            if text.is_empty() {
                if i < times.len() {
                    last_time = times[i];
                }
                continue;
            }
            let end_time = times.get(i).copied().unwrap_or(block_end);
            for word in split_word_and_punctuation(text, last_time, end_time) {
                words.push(Word { num, ..word });
                num += 1;
            }
            last_time = end_time;
        }
    }

    words
}

/// Split punctuation glued to a word into its own entry, giving the word
/// 80% of the span and the punctuation the rest.
fn split_word_and_punctuation(text: &str, start: f64, end: f64) -> Vec<Word> {
    let trailing: &[char] = &['.', '!', '?', ',', ':', ';'];
    let mut result = Vec::new();

    let stripped = text.trim_end_matches(trailing);
    if stripped.len() < text.len() && !stripped.is_empty() {
        let punct = &text[stripped.len()..];
        let word_end = start + (end - start) * 0.8;
        result.push(Word {
            num: 0,
            text: stripped.to_string(),
            start,
            end: word_end,
        });
        result.push(Word {
            num: 0,
            text: punct.to_string(),
            start: word_end,
            end,
        });
        return result;
    }

    let lead_stripped = text.trim_start_matches(trailing);
    if lead_stripped.len() < text.len() && !lead_stripped.is_empty() {
        let punct = &text[..text.len() - lead_stripped.len()];
        let punct_end = start + (end - start) * 0.2;
        result.push(Word {
            num: 0,
            text: punct.to_string(),
            start,
            end: punct_end,
        });
        result.push(Word {
            num: 0,
            text: lead_stripped.to_string(),
            start: punct_end,
            end,
        });
        return result;
    }

    result.push(Word {
        num: 0,
        text: text.to_string(),
        start,
        end,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "WEBVTT\nKind: captions\nLanguage: en\n\n\
00:00:00.000 --> 00:00:03.000\n\
Hello<00:00:00.500><c> world</c><00:00:01.000><c> again</c>\n\n\
00:00:03.000 --> 00:00:05.000\n\
more<00:00:03.700><c> words,</c>\n";

    #[test]
    fn test_parse_vtt_words() {
        let words = parse_vtt_content(SAMPLE);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello", "world", "again", "more", "words", ","]);
        // Ordinals dense and increasing.
        for (i, word) in words.iter().enumerate() {
            assert_eq!(word.num, i);
        }
        assert!((words[0].start - 0.0).abs() < 0.001);
        assert!((words[0].end - 0.5).abs() < 0.001);
        assert!((words[1].start - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_vtt_skips_untagged_lines() {
        let content = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\nplain repeat line\n";
        assert!(parse_vtt_content(content).is_empty());
    }

    #[test]
    fn test_split_trailing_punctuation() {
        let words = split_word_and_punctuation("done.", 1.0, 2.0);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "done");
        assert!((words[0].end - 1.8).abs() < 0.001);
        assert_eq!(words[1].text, ".");
        assert!((words[1].end - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_split_leading_punctuation() {
        let words = split_word_and_punctuation(",next", 0.0, 1.0);
        assert_eq!(words[0].text, ",");
        assert_eq!(words[1].text, "next");
    }

    #[test]
    fn test_plain_word_untouched() {
        let words = split_word_and_punctuation("word", 0.0, 1.0);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "word");
    }
}
