//! Sentence segmentation.
//!
//! Turns raw transcripts or word-timed streams into translation-sized
//! sentences. Strategies run top-down: punctuation first, then (at the
//! translator) LLM splits, then prosodic pauses, then fixed-length
//! grouping that avoids breaking on function words or inside known
//! multi-word phrases.

use crate::lang;
use crate::providers::Word;

/// Words a sentence should not end on when the fixed-length splitter
/// chooses a cut point.
const AVOID_SENTENCE_END: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "on", "at", "by", "for", "with", "from", "as", "is",
    "are", "was", "were", "be", "been", "am", "do", "does", "did", "not", "no", "my", "your",
    "his", "her", "its", "our", "their", "and", "or", "but", "so", "very",
];

/// Multi-word units that must stay on one line.
const KEPT_PHRASES: &[(&str, &str)] = &[
    ("fall", "apart"),
    ("right", "now"),
    ("kind", "of"),
    ("sort", "of"),
    ("a", "lot"),
    ("at", "all"),
    ("as", "well"),
    ("figure", "out"),
    ("give", "up"),
    ("come", "on"),
    ("each", "other"),
    ("of", "course"),
];

/// Connectors that always start a new sentence.
const STRONG_CONNECTORS: &[&str] = &[
    "however",
    "therefore",
    "moreover",
    "furthermore",
    "nevertheless",
    "meanwhile",
    "consequently",
    "otherwise",
    "instead",
    "finally",
    "additionally",
];

/// Connectors that start a new sentence only when the material before them
/// already contains a likely verb.
const WEAK_CONNECTORS: &[&str] = &[
    "and", "but", "because", "so", "or", "while", "when", "then", "although", "since", "unless",
];

const COMMON_VERBS: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "am", "have", "has", "had", "do", "does", "did",
    "go", "went", "gone", "make", "made", "take", "took", "get", "got", "know", "knew", "think",
    "thought", "see", "saw", "seen", "say", "said", "want", "need", "use", "work", "find",
    "found", "tell", "told", "become", "leave", "left", "put", "mean", "keep", "kept", "let",
    "begin", "began", "seem", "help", "show", "hear", "heard", "play", "run", "ran", "move",
    "believe", "bring", "brought", "happen", "write", "wrote", "sit", "stand", "lose", "lost",
    "pay", "paid", "meet", "met", "come", "came", "look", "feel", "felt", "try", "tried",
    "call", "ask", "asked", "turn", "start", "like", "live", "talk", "give", "gave",
];

/// True for characters counted as one rendered cell each.
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK unified
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{3040}'..='\u{30FF}' // hiragana + katakana
        | '\u{AC00}'..='\u{D7AF}' // hangul
        | '\u{0E00}'..='\u{0E7F}' // thai
    )
}

/// Rendered character count: CJK counts one per character, Latin text by
/// its letters; whitespace does not count.
pub fn count_effective_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Keep only characters the aligner can match against ASR output.
pub fn recognizable_chars(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || is_cjk(*c))
        .collect()
}

/// Sentence tokens for word-level alignment: split on anything that is not
/// a letter or digit.
pub fn sentence_tokens(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Strip punctuation glued to the edges of a sentence candidate.
pub fn clean_edge_punctuation(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c) && !c.is_whitespace())
        .trim()
        .to_string()
}

/// A long text with almost no punctuation cannot be split on it.
pub fn is_punctuation_sparse(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    let total = trimmed.chars().count();
    let punct = trimmed
        .chars()
        .filter(|c| matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '，' | '。' | '！' | '？' | '；' | '：'))
        .count();
    if punct == 0 && total > 20 {
        return true;
    }
    (punct as f64) / (total as f64) < 0.01
}

/// Strategy 1: partition on sentence-final punctuation, then on commas and
/// semicolons for any piece still over the budget.
pub fn split_by_punctuation(text: &str, max_len: usize) -> Vec<String> {
    let primary = split_keeping(text, &['.', '!', '?', '。', '！', '？']);

    let mut result = Vec::new();
    for piece in primary {
        if count_effective_chars(&piece) <= max_len {
            push_nonempty(&mut result, piece);
            continue;
        }
        for sub in split_keeping(&piece, &[',', ';', '，', '；']) {
            push_nonempty(&mut result, sub);
        }
    }
    result
}

fn split_keeping(text: &str, stops: &[char]) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if stops.contains(&c) {
            pieces.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

fn push_nonempty(result: &mut Vec<String>, piece: String) {
    let cleaned = clean_edge_punctuation(&piece);
    if !cleaned.is_empty() {
        result.push(cleaned);
    }
}

/// Strategy 3: cut a word-timed stream on pauses, accumulated duration, or
/// accumulated character count, whichever trips first.
pub fn split_by_pauses(words: &[Word], lang_code: &str, max_chars: usize) -> Vec<String> {
    if words.is_empty() {
        return Vec::new();
    }

    let (min_pause, max_duration) = if lang::is_asian_language(lang_code) {
        (0.30, 3.5)
    } else {
        (0.45, 4.5)
    };
    let join_with_space = lang::joins_with_space(lang_code);

    let mut result = Vec::new();
    let mut builder = String::new();
    let mut current_start = words[0].start;
    let mut prev_end = words[0].end;
    let mut char_count = 0usize;

    let append = |builder: &mut String, char_count: &mut usize, text: &str| {
        if !builder.is_empty() && join_with_space {
            builder.push(' ');
        }
        builder.push_str(text);
        *char_count += count_effective_chars(text);
    };
    let flush = |builder: &mut String, char_count: &mut usize, result: &mut Vec<String>| {
        let text = clean_edge_punctuation(builder);
        if !text.is_empty() {
            result.push(text);
        }
        builder.clear();
        *char_count = 0;
    };

    append(&mut builder, &mut char_count, words[0].text.trim());

    for word in &words[1..] {
        let pause = word.start - prev_end;
        let duration = word.end - current_start;
        let next_chars = char_count + count_effective_chars(&word.text);

        if pause >= min_pause || duration >= max_duration || next_chars >= max_chars {
            flush(&mut builder, &mut char_count, &mut result);
            current_start = word.start;
        }
        append(&mut builder, &mut char_count, word.text.trim());
        prev_end = word.end;
    }
    if !builder.is_empty() {
        flush(&mut builder, &mut char_count, &mut result);
    }

    if result.is_empty() {
        let joined = words
            .iter()
            .map(|w| w.text.trim())
            .collect::<Vec<_>>()
            .join(if join_with_space { " " } else { "" });
        let text = clean_edge_punctuation(&joined);
        if !text.is_empty() {
            result.push(text);
        }
    }
    result
}

/// Strategy 4: group ~12 words per sentence, clamped to [8, 18], steering
/// cut points away from function words and phrase interiors. Surviving
/// fragments of one or two words are merged into the preceding sentence.
pub fn split_fixed_length(tokens: &[String]) -> Vec<String> {
    const TARGET: usize = 12;
    const MIN: usize = 8;
    const MAX: usize = 18;

    if tokens.is_empty() {
        return Vec::new();
    }

    let bad_cut = |cut: usize| -> bool {
        if cut >= tokens.len() {
            return false;
        }
        let last = tokens[cut - 1].to_lowercase();
        if AVOID_SENTENCE_END.contains(&last.as_str()) {
            return true;
        }
        let next = tokens[cut].to_lowercase();
        KEPT_PHRASES
            .iter()
            .any(|(a, b)| *a == last.as_str() && *b == next.as_str())
    };

    let mut sentences: Vec<String> = Vec::new();
    let mut begin = 0usize;
    while begin < tokens.len() {
        let mut cut = (begin + TARGET).min(tokens.len());
        if cut < tokens.len() {
            let mut moved = false;
            let mut back = cut;
            while back > begin + MIN && bad_cut(back) {
                back -= 1;
            }
            if !bad_cut(back) {
                cut = back;
                moved = true;
            }
            if !moved {
                let mut forward = cut;
                while forward < tokens.len() && forward < begin + MAX && bad_cut(forward) {
                    forward += 1;
                }
                cut = forward.min(tokens.len());
            }
        }
        sentences.push(tokens[begin..cut].join(" "));
        begin = cut;
    }

    merge_short_fragments(sentences, 2)
}

/// Merge sentences of at most `max_words` words into their predecessor.
fn merge_short_fragments(sentences: Vec<String>, max_words: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for sentence in sentences {
        let word_count = sentence.split_whitespace().count();
        if word_count <= max_words {
            if let Some(prev) = merged.last_mut() {
                prev.push(' ');
                prev.push_str(&sentence);
                continue;
            }
        }
        merged.push(sentence);
    }
    merged
}

fn looks_like_verb(word: &str) -> bool {
    let lower = word.to_lowercase();
    if COMMON_VERBS.contains(&lower.as_str()) {
        return true;
    }
    (lower.len() > 4 && lower.ends_with("ing")) || (lower.len() > 3 && lower.ends_with("ed"))
}

/// Break a chunk of tokens before connectors. Strong connectors always
/// break; weak ones only when the pending part already holds a verb.
/// Sentences shorter than three words are merged back.
pub fn split_by_connectors(tokens: &[String]) -> Vec<String> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut sentences: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in tokens {
        let lower = token.to_lowercase();
        let strong = STRONG_CONNECTORS.contains(&lower.as_str());
        let weak = WEAK_CONNECTORS.contains(&lower.as_str())
            && current.iter().any(|w| looks_like_verb(w));
        if (strong || weak) && !current.is_empty() {
            sentences.push(current.join(" "));
            current.clear();
        }
        current.push(token);
    }
    if !current.is_empty() {
        sentences.push(current.join(" "));
    }

    merge_short_fragments(sentences, 2)
}

/// Two-layer segmentation for long, punctuation-free word streams.
///
/// Layer one cuts coarse chunks at pauses of at least half a second or
/// every 100 words; layer two applies connector breaks, then pause-based
/// cuts, then fixed-length grouping to anything still over budget.
pub fn split_timed_words(words: &[Word], lang_code: &str, max_chars: usize) -> Vec<String> {
    if words.is_empty() {
        return Vec::new();
    }

    const COARSE_GAP: f64 = 0.5;
    const COARSE_CHUNK: usize = 100;

    let mut chunks: Vec<&[Word]> = Vec::new();
    let mut chunk_start = 0usize;
    for i in 1..words.len() {
        let gap = words[i].start - words[i - 1].end;
        if gap >= COARSE_GAP || i - chunk_start >= COARSE_CHUNK {
            chunks.push(&words[chunk_start..i]);
            chunk_start = i;
        }
    }
    chunks.push(&words[chunk_start..]);

    let mut result = Vec::new();
    for chunk in chunks {
        for sentence in split_chunk(chunk, lang_code, max_chars) {
            result.push(sentence);
        }
    }
    merge_short_fragments(result, 2)
}

fn split_chunk(chunk: &[Word], lang_code: &str, max_chars: usize) -> Vec<String> {
    if lang::joins_with_space(lang_code) {
        let tokens: Vec<String> = chunk.iter().map(|w| w.text.trim().to_string()).collect();
        let candidates = split_by_connectors(&tokens);
        if candidates
            .iter()
            .all(|s| count_effective_chars(s) <= max_chars)
        {
            return candidates;
        }
    }

    let by_pause = split_by_pauses(chunk, lang_code, max_chars);
    if by_pause
        .iter()
        .all(|s| count_effective_chars(s) <= max_chars)
    {
        return by_pause;
    }

    let mut result = Vec::new();
    for sentence in by_pause {
        if count_effective_chars(&sentence) <= max_chars {
            result.push(sentence);
        } else {
            let tokens: Vec<String> =
                sentence.split_whitespace().map(|t| t.to_string()).collect();
            if tokens.len() > 1 {
                result.extend(split_fixed_length(&tokens));
            } else {
                result.push(sentence);
            }
        }
    }
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

    #[test]
    fn test_count_effective_chars() {
        assert_eq!(count_effective_chars("hello world"), 10);
        assert_eq!(count_effective_chars("你好世界"), 4);
        assert_eq!(count_effective_chars("  "), 0);
    }

    #[test]
    fn test_recognizable_chars() {
        assert_eq!(recognizable_chars("你好，世界!"), "你好世界");
        assert_eq!(recognizable_chars("Hello, world!"), "Helloworld");
    }

    #[test]
    fn test_sentence_tokens() {
        assert_eq!(
            sentence_tokens("Hello, world — it's me"),
            vec!["Hello", "world", "it", "s", "me"]
        );
    }

    #[test]
    fn test_split_by_punctuation_basic() {
        let result = split_by_punctuation("First sentence. Second one! Third?", 64);
        assert_eq!(result, vec!["First sentence", "Second one", "Third"]);
    }

    #[test]
    fn test_split_by_punctuation_falls_to_commas() {
        let long = "aaaa bbbb cccc dddd, eeee ffff gggg hhhh, iiii jjjj.";
        let result = split_by_punctuation(long, 16);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], "aaaa bbbb cccc dddd");
    }

    #[test]
    fn test_split_by_punctuation_cjk() {
        let result = split_by_punctuation("你好世界。今天天气不错！", 64);
        assert_eq!(result, vec!["你好世界", "今天天气不错"]);
    }

    #[test]
    fn test_punctuation_sparse() {
        assert!(is_punctuation_sparse(
            "a long stretch of words with no punctuation at all in it"
        ));
        assert!(!is_punctuation_sparse("Short, punchy. Clear!"));
        assert!(is_punctuation_sparse(""));
    }

    #[test]
    fn test_split_by_pauses_cuts_on_gap() {
        let words = vec![
            word(0, "one", 0.0, 0.2),
            word(1, "two", 0.25, 0.5),
            // 0.6 s pause
            word(2, "three", 1.1, 1.3),
            word(3, "four", 1.35, 1.6),
        ];
        let result = split_by_pauses(&words, "en", 64);
        assert_eq!(result, vec!["one two", "three four"]);
    }

    #[test]
    fn test_split_by_pauses_asian_thresholds() {
        let words = vec![
            word(0, "你", 0.0, 0.2),
            // 0.35 s pause, over the 0.30 asian threshold
            word(1, "好", 0.55, 0.7),
        ];
        let result = split_by_pauses(&words, "zh", 64);
        assert_eq!(result, vec!["你", "好"]);
        // The same gap stays intact for English.
        let result = split_by_pauses(&words, "en", 64);
        assert_eq!(result, vec!["你 好"]);
    }

    #[test]
    fn test_split_by_pauses_duration_cap() {
        let words: Vec<Word> = (0..20)
            .map(|i| word(i, "w", i as f64 * 0.4, i as f64 * 0.4 + 0.35))
            .collect();
        let result = split_by_pauses(&words, "en", 1000);
        assert!(result.len() > 1, "4.5s duration cap should have split");
    }

    #[test]
    fn test_split_fixed_length_groups() {
        let tokens: Vec<String> = (0..30).map(|i| format!("word{i}")).collect();
        let result = split_fixed_length(&tokens);
        assert!(result.len() >= 2);
        for sentence in &result {
            let n = sentence.split_whitespace().count();
            assert!(n >= 3, "fragment too short: {sentence}");
            assert!(n <= 18, "sentence too long: {sentence}");
        }
        let rejoined: Vec<String> = result
            .join(" ")
            .split_whitespace()
            .map(String::from)
            .collect();
        assert_eq!(rejoined, tokens);
    }

    #[test]
    fn test_split_fixed_length_avoids_article_end() {
        let mut tokens: Vec<String> = (0..11).map(|i| format!("w{i}")).collect();
        tokens.push("the".to_string()); // position 11, the default cut point
        tokens.extend((0..10).map(|i| format!("x{i}")));
        let result = split_fixed_length(&tokens);
        for sentence in &result[..result.len() - 1] {
            assert!(
                !sentence.ends_with(" the"),
                "cut landed on an article: {sentence}"
            );
        }
    }

    #[test]
    fn test_split_by_connectors_strong() {
        let tokens: Vec<String> = "we tried the approach however it failed badly"
            .split_whitespace()
            .map(String::from)
            .collect();
        let result = split_by_connectors(&tokens);
        assert_eq!(
            result,
            vec!["we tried the approach", "however it failed badly"]
        );
    }

    #[test]
    fn test_split_by_connectors_weak_needs_verb() {
        // No verb before "and": no break.
        let tokens: Vec<String> = "red apples and green pears from home"
            .split_whitespace()
            .map(String::from)
            .collect();
        let result = split_by_connectors(&tokens);
        assert_eq!(result.len(), 1);

        // Verb before "and": break.
        let tokens: Vec<String> = "we painted the fence white and the gate stayed blue"
            .split_whitespace()
            .map(String::from)
            .collect();
        let result = split_by_connectors(&tokens);
        assert_eq!(result.len(), 2);
        assert!(result[1].starts_with("and"));
    }

    #[test]
    fn test_split_timed_words_two_layer() {
        // 250 words, no punctuation, gaps every 50 words.
        let mut words = Vec::new();
        let mut t = 0.0;
        for i in 0..250usize {
            if i > 0 && i % 50 == 0 {
                t += 0.8; // coarse gap
            }
            words.push(word(i, &format!("tok{i}"), t, t + 0.2));
            t += 0.25;
        }
        let result = split_timed_words(&words, "en", 64);
        assert!(result.len() >= 5);
        for sentence in &result {
            assert!(sentence.split_whitespace().count() >= 3);
        }
        // Nothing got lost.
        let total: usize = result.iter().map(|s| s.split_whitespace().count()).sum();
        assert_eq!(total, 250);
    }

    #[test]
    fn test_split_timed_words_empty() {
        assert!(split_timed_words(&[], "en", 64).is_empty());
    }

    #[test]
    fn test_merge_short_fragments() {
        let sentences = vec![
            "a full sentence here".to_string(),
            "tiny bit".to_string(),
            "another complete sentence follows".to_string(),
        ];
        let result = merge_short_fragments(sentences, 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "a full sentence here tiny bit");
    }
}
