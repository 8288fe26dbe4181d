//! Timestamp alignment.
//!
//! Maps a sentence back onto the word-timed ASR stream and reconstructs
//! its start/end. Tolerates duplicated, reordered, and missing words: the
//! anchor is the longest run of matched words with consecutive ordinals
//! (space-separated languages) or the longest increasing ordinal
//! subsequence (languages written without spaces).
//!
//! The aligner is pure; it never mutates the word stream.

use crate::error::{Result, SublingoError};
use crate::providers::Word;
use crate::sentence;

/// Ordinal used for sentence tokens that matched nothing in the stream.
/// Chosen so a placeholder can never extend a consecutive run.
const UNMATCHED: usize = usize::MAX;

/// Resolved timing for one sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentenceTimestamps {
    pub start: f64,
    pub end: f64,
}

/// Outcome of aligning one sentence: its timing, the realized word list
/// (used by the short-line splitter), and the advanced `last_ts` cursor.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub timestamps: SentenceTimestamps,
    pub words: Vec<Word>,
    pub last_ts: f64,
}

/// Align `sentence` against `words`, never starting before `last_ts`.
///
/// `word_dialect` selects token-by-token matching (English and friends);
/// otherwise the per-character dialect is used.
pub fn sentence_timestamps(
    words: &[Word],
    sentence: &str,
    last_ts: f64,
    word_dialect: bool,
) -> Result<Alignment> {
    if words.is_empty() {
        return Err(SublingoError::Alignment("empty word stream".to_string()));
    }
    if word_dialect {
        align_by_words(words, sentence, last_ts)
    } else {
        align_by_chars(words, sentence, last_ts)
    }
}

fn align_by_words(words: &[Word], sentence: &str, last_ts: f64) -> Result<Alignment> {
    let tokens = sentence::sentence_tokens(sentence);
    if tokens.is_empty() {
        return Err(SublingoError::Alignment("empty sentence".to_string()));
    }

    // For each sentence token, the first stream word matching it
    // case-insensitively at or after the cursor. Tokens without a match
    // become placeholders with no timing.
    let mut sentence_words: Vec<Word> = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let found = words
            .iter()
            .find(|w| w.start >= last_ts && w.text.eq_ignore_ascii_case(token));
        match found {
            Some(w) => sentence_words.push(w.clone()),
            None => sentence_words.push(Word {
                num: UNMATCHED,
                text: token.clone(),
                start: 0.0,
                end: 0.0,
            }),
        }
    }

    let (run_begin, run_end) = find_max_consecutive_run(&sentence_words);
    if run_end - run_begin == 0 {
        return Err(SublingoError::Alignment(
            "no consecutive matched run".to_string(),
        ));
    }

    let mut begin_word = sentence_words[run_begin].clone();
    let mut end_word = sentence_words[run_end - 1].clone();

    // The whole token sequence mapped: take the run's bounds directly.
    if run_end - run_begin == sentence_words.len() {
        return Ok(Alignment {
            timestamps: SentenceTimestamps {
                start: begin_word.start,
                end: end_word.end,
            },
            words: sentence_words,
            last_ts: end_word.end,
        });
    }

    // Extend leftward: absorb neighbors whose text equals the preceding
    // unmatched tokens. Empty-text stream entries are skipped.
    if run_begin > 0 {
        let mut i = run_begin as isize - 1;
        let mut j = begin_word.num as isize - 1;
        while i >= 0 && j >= 0 {
            let stream_word = &words[j as usize];
            if stream_word.text.is_empty() {
                j -= 1;
                continue;
            }
            if stream_word
                .text
                .eq_ignore_ascii_case(&sentence_words[i as usize].text)
            {
                begin_word = stream_word.clone();
                sentence_words[i as usize] = stream_word.clone();
            } else {
                break;
            }
            i -= 1;
            j -= 1;
        }
    }

    // Extend rightward symmetrically.
    if run_end < sentence_words.len() {
        let mut i = run_end;
        let mut j = end_word.num + 1;
        while i < sentence_words.len() && j < words.len() {
            let stream_word = &words[j];
            if stream_word.text.is_empty() {
                j += 1;
                continue;
            }
            if stream_word.text.eq_ignore_ascii_case(&sentence_words[i].text) {
                end_word = stream_word.clone();
                sentence_words[i] = stream_word.clone();
            } else {
                break;
            }
            i += 1;
            j += 1;
        }
    }

    // Snap to the sentence's own matched boundary words when the run lies
    // within ten ordinals of them.
    let first = &sentence_words[0];
    if first.num != UNMATCHED && begin_word.num > first.num && begin_word.num - first.num < 10 {
        begin_word = first.clone();
    }
    let last = &sentence_words[sentence_words.len() - 1];
    if last.num != UNMATCHED && last.num > end_word.num && last.num - end_word.num < 10 {
        end_word = last.clone();
    }

    let start = begin_word.start.max(last_ts);
    let end = end_word.end;
    let new_last_ts = if begin_word.num != end_word.num && end > last_ts {
        end
    } else {
        last_ts
    };

    Ok(Alignment {
        timestamps: SentenceTimestamps { start, end },
        words: sentence_words,
        last_ts: new_last_ts,
    })
}

fn align_by_chars(words: &[Word], sentence: &str, last_ts: f64) -> Result<Alignment> {
    let chars: Vec<String> = sentence::recognizable_chars(sentence)
        .chars()
        .map(|c| c.to_string())
        .collect();
    if chars.is_empty() {
        return Err(SublingoError::Alignment("empty sentence".to_string()));
    }

    // A character may produce several candidates; collect them all and let
    // the increasing-subsequence search pick the coherent realization.
    let mut candidates: Vec<Word> = Vec::new();
    for ch in &chars {
        for word in words {
            if word.start < last_ts {
                continue;
            }
            if word.text.eq_ignore_ascii_case(ch) || word.text.starts_with(ch.as_str()) {
                candidates.push(word.clone());
            }
        }
    }

    let realization = longest_increasing_subsequence(&candidates);
    if realization.len() < 2 {
        return Err(SublingoError::Alignment(
            "no increasing subsequence".to_string(),
        ));
    }

    let begin_word = realization.first().unwrap().clone();
    let end_word = realization.last().unwrap().clone();

    let start = begin_word.start.max(last_ts);
    let end = end_word.end;
    let new_last_ts = if begin_word.num != end_word.num && end > last_ts {
        end
    } else {
        last_ts
    };

    Ok(Alignment {
        timestamps: SentenceTimestamps { start, end },
        words: realization,
        last_ts: new_last_ts,
    })
}

/// Longest run where each word's ordinal is exactly one more than its
/// predecessor's. Returns a half-open `(begin, end)` index pair into the
/// input; `(0, 0)` when the input is empty.
fn find_max_consecutive_run(words: &[Word]) -> (usize, usize) {
    if words.is_empty() {
        return (0, 0);
    }

    let mut max_start = 0;
    let mut max_len = 1;
    let mut curr_start = 0;
    let mut curr_len = 1;

    for i in 1..words.len() {
        let continues = words[i - 1].num != UNMATCHED
            && words[i - 1].num.checked_add(1) == Some(words[i].num);
        if continues {
            curr_len += 1;
        } else {
            if curr_len > max_len {
                max_start = curr_start;
                max_len = curr_len;
            }
            curr_start = i;
            curr_len = 1;
        }
    }
    if curr_len > max_len {
        max_start = curr_start;
        max_len = curr_len;
    }

    // A single unmatched placeholder is not a run.
    if max_len == 1 && words[max_start].num == UNMATCHED {
        return (max_start, max_start);
    }
    (max_start, max_start + max_len)
}

/// Longest subsequence with ordinals increasing by exactly one per step,
/// not necessarily adjacent in the candidate list. Classic DP with
/// predecessor links; the element list is the canonical realization.
fn longest_increasing_subsequence(words: &[Word]) -> Vec<Word> {
    if words.is_empty() {
        return Vec::new();
    }

    let n = words.len();
    let mut dp = vec![1usize; n];
    let mut prev = vec![usize::MAX; n];

    let mut max_len = 0;
    let mut end_idx = usize::MAX;

    for i in 1..n {
        for j in 0..i {
            if words[j].num.checked_add(1) == Some(words[i].num) && dp[i] < dp[j] + 1 {
                dp[i] = dp[j] + 1;
                prev[i] = j;
            }
        }
        if dp[i] > max_len {
            max_len = dp[i];
            end_idx = i;
        }
    }

    if end_idx == usize::MAX {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(max_len);
    let mut idx = end_idx;
    loop {
        result.push(words[idx].clone());
        if prev[idx] == usize::MAX {
            break;
        }
        idx = prev[idx];
    }
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(num: usize, text: &str, start: f64, end: f64) -> Word {
        Word {
            num,
            text: text.to_string(),
            start,
            end,
        }
    }

    fn hello_stream() -> Vec<Word> {
        vec![
            word(0, "Hello", 0.0, 0.4),
            word(1, "world", 0.4, 0.8),
            word(2, "this", 0.9, 1.1),
            word(3, "is", 1.1, 1.2),
            word(4, "a", 1.2, 1.3),
            word(5, "test", 1.3, 1.7),
        ]
    }

    #[test]
    fn test_full_sentence_alignment() {
        let alignment =
            sentence_timestamps(&hello_stream(), "Hello world this is a test", 0.0, true).unwrap();
        assert_eq!(alignment.timestamps.start, 0.0);
        assert_eq!(alignment.timestamps.end, 1.7);
        assert_eq!(alignment.last_ts, 1.7);
        assert_eq!(alignment.words.len(), 6);
    }

    #[test]
    fn test_alignment_with_duplicate_noise() {
        // Duplicate "a" appears later in the stream; the longest
        // consecutive run still covers ordinals 0..5.
        let mut stream = hello_stream();
        stream.push(word(6, "unrelated", 2.0, 2.4));
        stream.push(word(7, "a", 2.5, 2.6));

        let alignment =
            sentence_timestamps(&stream, "Hello world this is a test", 0.0, true).unwrap();
        assert_eq!(alignment.timestamps.start, 0.0);
        assert_eq!(alignment.timestamps.end, 1.7);
        assert_eq!(alignment.last_ts, 1.7);
    }

    #[test]
    fn test_alignment_respects_last_ts() {
        // The same text occurs twice; with the cursor past the first
        // occurrence, the second is chosen and start never regresses.
        let stream = vec![
            word(0, "go", 0.0, 0.3),
            word(1, "on", 0.3, 0.5),
            word(2, "go", 5.0, 5.3),
            word(3, "on", 5.3, 5.6),
        ];
        let alignment = sentence_timestamps(&stream, "go on", 4.0, true).unwrap();
        assert!(alignment.timestamps.start >= 4.0);
        assert_eq!(alignment.timestamps.end, 5.6);
    }

    #[test]
    fn test_alignment_empty_sentence_fails() {
        assert!(sentence_timestamps(&hello_stream(), "", 0.0, true).is_err());
        assert!(sentence_timestamps(&hello_stream(), "...", 0.0, true).is_err());
    }

    #[test]
    fn test_alignment_empty_stream_fails() {
        assert!(sentence_timestamps(&[], "hello", 0.0, true).is_err());
    }

    #[test]
    fn test_alignment_no_overlap_with_stream_fails() {
        let alignment = sentence_timestamps(&hello_stream(), "完全不同", 0.0, true);
        assert!(alignment.is_err());
    }

    #[test]
    fn test_chinese_char_alignment() {
        let stream = vec![
            word(0, "你", 0.0, 0.2),
            word(1, "好", 0.2, 0.4),
            word(2, "世", 0.5, 0.7),
            word(3, "界", 0.7, 1.0),
        ];
        let alignment = sentence_timestamps(&stream, "你好世界", 0.0, false).unwrap();
        assert_eq!(alignment.timestamps.start, 0.0);
        assert_eq!(alignment.timestamps.end, 1.0);
        assert_eq!(alignment.last_ts, 1.0);
    }

    #[test]
    fn test_chinese_alignment_with_gap_in_candidates() {
        // Candidate list is polluted by a repeated character far away; the
        // jumping subsequence still picks the coherent run.
        let stream = vec![
            word(0, "你", 0.0, 0.2),
            word(1, "好", 0.2, 0.4),
            word(2, "你", 3.0, 3.2),
            word(3, "世", 0.5, 0.7),
            word(4, "界", 0.7, 1.0),
        ];
        let alignment = sentence_timestamps(&stream, "你好世界", 0.0, false).unwrap();
        // The longest ordinal chain is 2,3,4 (the repeated 你 bridges into
        // 世界); the realization carries exactly that chain.
        let nums: Vec<usize> = alignment.words.iter().map(|w| w.num).collect();
        assert_eq!(nums, vec![2, 3, 4]);
    }

    #[test]
    fn test_find_max_consecutive_run() {
        let words = vec![
            word(5, "a", 0.0, 0.1),
            word(0, "b", 0.0, 0.1),
            word(1, "c", 0.0, 0.1),
            word(2, "d", 0.0, 0.1),
            word(9, "e", 0.0, 0.1),
        ];
        assert_eq!(find_max_consecutive_run(&words), (1, 4));
    }

    #[test]
    fn test_find_max_consecutive_run_all_unmatched() {
        let words = vec![
            word(UNMATCHED, "a", 0.0, 0.0),
            word(UNMATCHED, "b", 0.0, 0.0),
        ];
        let (begin, end) = find_max_consecutive_run(&words);
        assert_eq!(end - begin, 0);
    }

    #[test]
    fn test_longest_increasing_subsequence() {
        let words = vec![
            word(3, "a", 0.0, 0.1),
            word(0, "b", 0.0, 0.1),
            word(4, "c", 0.0, 0.1),
            word(1, "d", 0.0, 0.1),
            word(2, "e", 0.0, 0.1),
            word(3, "f", 0.0, 0.1),
        ];
        let lis = longest_increasing_subsequence(&words);
        let nums: Vec<usize> = lis.iter().map(|w| w.num).collect();
        assert_eq!(nums, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_extension_around_run() {
        // "very good morning everyone" where "very" matched a late
        // duplicate, breaking the run; extension pulls it back to the
        // neighbor of the run's begin word.
        let stream = vec![
            word(0, "very", 0.0, 0.3),
            word(1, "good", 0.3, 0.6),
            word(2, "morning", 0.6, 1.0),
            word(3, "everyone", 1.0, 1.5),
            word(4, "very", 4.0, 4.3),
        ];
        // Cursor at 0.1 pushes the literal "very" match to ordinal 4,
        // so the consecutive run is 1..3 and leftward extension recovers
        // ordinal 0? No: ordinal 0 starts before the cursor, extension
        // still compares text only, so begin becomes ordinal 0 and the
        // final start is clamped to the cursor.
        let alignment =
            sentence_timestamps(&stream, "very good morning everyone", 0.1, true).unwrap();
        assert_eq!(alignment.timestamps.start, 0.1);
        assert_eq!(alignment.timestamps.end, 1.5);
    }
}
