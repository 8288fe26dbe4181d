//! LLM-backed translation.
//!
//! Two entry points: context-aware per-sentence translation with bounded
//! parallelism, and the split-and-translate call used by the audio
//! pipeline, whose response doubles as the no-timestamp subtitle file.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{Result, SublingoError};
use crate::lang;
use crate::prompts;
use crate::providers::ChatCompleter;
use crate::sentence;

/// How many sentences of surrounding context ride along in each prompt.
const CONTEXT_SENTENCES: usize = 3;
/// Attempt budget for the split-and-translate call.
const SPLIT_TRANSLATE_ATTEMPTS: usize = 4;
/// Attempt budget for one LLM long-sentence split.
const LONG_SPLIT_ATTEMPTS: usize = 3;
/// Recursion cap for LLM long-sentence splitting.
const LONG_SPLIT_MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedItem {
    pub origin: String,
    pub translated: String,
}

pub struct Translator {
    chat: Arc<dyn ChatCompleter>,
    parallel: usize,
    max_sentence_length: usize,
}

impl Translator {
    pub fn new(chat: Arc<dyn ChatCompleter>, parallel: usize, max_sentence_length: usize) -> Self {
        Self {
            chat,
            parallel: parallel.max(1),
            max_sentence_length,
        }
    }

    /// Translate sentences one-by-one with up to three neighbors on each
    /// side as untranslated context. The output always has the same
    /// length as the input: a failed call falls back to the source text.
    pub async fn translate_sentences(
        &self,
        sentences: &[String],
        target_lang: &str,
    ) -> Vec<TranslatedItem> {
        if sentences.is_empty() {
            return Vec::new();
        }

        let language = lang::language_name(target_lang);
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut handles = Vec::with_capacity(sentences.len());

        for (index, sentence) in sentences.iter().enumerate() {
            let previous = context_window(sentences, index, true);
            let next = context_window(sentences, index, false);
            let prompt =
                prompts::translate_with_context_prompt(language, &previous, sentence, &next);
            let chat = self.chat.clone();
            let semaphore = semaphore.clone();
            let origin = sentence.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                match chat.chat_completion(&prompt).await {
                    Ok(translated) => {
                        let cleaned = translated
                            .trim()
                            .trim_matches(|c| c == '"' || c == '\'')
                            .to_string();
                        TranslatedItem {
                            origin,
                            translated: cleaned,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "translation failed for one sentence, keeping source");
                        TranslatedItem {
                            translated: origin.clone(),
                            origin,
                        }
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(item) => results.push(item),
                Err(e) => {
                    // A panicked worker still must not shrink the output.
                    warn!(error = %e, "translation worker panicked, keeping source");
                    results.push(TranslatedItem {
                        origin: String::new(),
                        translated: String::new(),
                    });
                }
            }
        }
        results
    }

    /// Split an over-long transcript into sentences and translate them in
    /// one LLM round trip. Returns the raw triplet-block content; the
    /// caller writes it as the per-segment no-timestamp file.
    ///
    /// Responses must parse as `<index, translated, original>` triplets
    /// whose concatenated originals stay within 200 characters of the
    /// transcript; malformed responses burn one of four attempts.
    pub async fn split_and_translate(
        &self,
        transcript: &str,
        target_lang: &str,
        modal_filter: bool,
    ) -> Result<String> {
        if transcript.is_empty() {
            return Ok(format!("{}\n", prompts::EMPTY_TRANSCRIPT_MARKER));
        }

        let prompt =
            prompts::split_and_translate_prompt(lang::language_name(target_lang), modal_filter);
        let mut last_error: Option<SublingoError> = None;

        for attempt in 0..SPLIT_TRANSLATE_ATTEMPTS {
            let response = match self
                .chat
                .chat_completion(&format!("{prompt}{transcript}"))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "split-and-translate call failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let cleaned = strip_markdown_fence(&response).to_string();
            if is_valid_split_content(&cleaned, transcript) {
                return Ok(cleaned);
            }
            warn!(
                attempt = attempt + 1,
                "split-and-translate response malformed or diverged from transcript"
            );
            last_error = Some(SublingoError::Translation(
                "invalid split content format or content mismatch".to_string(),
            ));
        }

        Err(last_error.unwrap_or_else(|| {
            SublingoError::Translation("split-and-translate exhausted attempts".to_string())
        }))
    }

    /// Shorten sentences over the budget, asking the LLM to cut any that
    /// punctuation could not. Recursion is capped; a sentence that stays
    /// long after the cap is returned unchanged.
    pub async fn shorten_sentences(&self, sentences: Vec<String>) -> Vec<String> {
        let mut result = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            if sentence::count_effective_chars(&sentence) <= self.max_sentence_length {
                result.push(sentence);
            } else {
                info!(sentence = %sentence, "asking the model to split a long sentence");
                let pieces = self.split_long_sentence(&sentence, 0).await;
                result.extend(pieces);
            }
        }
        result
    }

    fn split_long_sentence<'a>(
        &'a self,
        sentence: &'a str,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<String>> + Send + 'a>> {
        Box::pin(async move {
            if depth >= LONG_SPLIT_MAX_DEPTH {
                info!(depth, "long-sentence split hit recursion cap");
                return vec![sentence.to_string()];
            }

            let pieces = match self.request_split(sentence).await {
                Ok(pieces) if !pieces.is_empty() => pieces,
                Ok(_) | Err(_) => return vec![sentence.to_string()],
            };

            // No progress means the model echoed the input back.
            if pieces.len() == 1
                && sentence::count_effective_chars(&pieces[0])
                    >= sentence::count_effective_chars(sentence)
            {
                return vec![sentence.to_string()];
            }

            let mut result = Vec::with_capacity(pieces.len());
            for piece in pieces {
                if sentence::count_effective_chars(&piece) <= self.max_sentence_length {
                    result.push(piece);
                } else {
                    result.extend(self.split_long_sentence(&piece, depth + 1).await);
                }
            }
            result
        })
    }

    async fn request_split(&self, sentence: &str) -> Result<Vec<String>> {
        let prompt = prompts::split_long_sentence_prompt(sentence);
        let mut last_error: Option<SublingoError> = None;

        for attempt in 0..LONG_SPLIT_ATTEMPTS {
            let response = match self.chat.chat_completion(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "long-sentence split call failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let cleaned = strip_markdown_fence(&response);
            match serde_json::from_str::<SplitResult>(cleaned) {
                Ok(parsed) => {
                    return Ok(parsed
                        .short_sentences
                        .into_iter()
                        .map(|s| s.text)
                        .collect())
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "long-sentence split response unparsable");
                    last_error = Some(SublingoError::Json(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SublingoError::Translation("long-sentence split exhausted attempts".to_string())
        }))
    }
}

fn context_window(sentences: &[String], index: usize, before: bool) -> String {
    if before {
        let start = index.saturating_sub(CONTEXT_SENTENCES);
        sentences[start..index].join("\n")
    } else {
        let end = (index + 1 + CONTEXT_SENTENCES).min(sentences.len());
        sentences[index + 1..end].join("\n")
    }
}

/// Strip a surrounding markdown code fence from an LLM response.
pub fn strip_markdown_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Validate a split-and-translate response: triplet blocks whose
/// concatenated originals differ from the transcript by at most 200
/// characters.
pub fn is_valid_split_content(content: &str, original_text: &str) -> bool {
    if content.is_empty() || original_text.is_empty() {
        return content.is_empty() && original_text.is_empty();
    }
    if content.contains(prompts::EMPTY_TRANSCRIPT_MARKER) {
        return original_text.trim().chars().count() < 10;
    }

    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 3 {
        return false;
    }

    let mut original_lines: Vec<String> = Vec::new();
    let mut valid_format = false;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if line.parse::<usize>().is_ok() {
            if i + 2 >= lines.len() {
                warn!(line, "split content block truncated");
                return false;
            }
            let original = lines[i + 2]
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']');
            original_lines.push(original.to_string());
            i += 3;
            valid_format = true;
        } else {
            i += 1;
        }
    }

    if !valid_format || original_lines.is_empty() {
        warn!("split content has no triplet blocks");
        return false;
    }

    let combined: String = original_lines.concat();
    let original_len = original_text.trim().chars().count() as i64;
    let combined_len = combined.trim().chars().count() as i64;
    (original_len - combined_len).abs() <= 200
}

#[derive(Deserialize)]
struct SplitResult {
    short_sentences: Vec<ShortSentence>,
}

#[derive(Deserialize)]
struct ShortSentence {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChat {
        responses: Vec<std::result::Result<String, String>>,
        calls: AtomicUsize,
    }

    impl ScriptedChat {
        fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for ScriptedChat {
        async fn chat_completion(&self, _prompt: &str) -> Result<String> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let entry = self
                .responses
                .get(i.min(self.responses.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Err("no scripted response".to_string()));
            entry.map_err(SublingoError::Api)
        }
    }

    /// Echoes the sentence back in fake-translated form, failing on a
    /// chosen call number.
    struct EchoChat {
        fail_on: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatCompleter for EchoChat {
        async fn chat_completion(&self, prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                return Err(SublingoError::Api("scripted failure".to_string()));
            }
            let sentence = prompt
                .lines()
                .skip_while(|l| !l.starts_with("Sentence to translate:"))
                .nth(1)
                .unwrap_or("");
            Ok(format!("译:{sentence}"))
        }
    }

    #[test]
    fn test_strip_markdown_fence() {
        assert_eq!(strip_markdown_fence("plain"), "plain");
        assert_eq!(strip_markdown_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fence("```\nbody\n```"), "body");
    }

    #[test]
    fn test_is_valid_split_content_accepts_triplets() {
        let content = "1\n[你好世界]\n[Hello world]\n\n2\n[再见]\n[Goodbye]\n";
        assert!(is_valid_split_content(content, "Hello world Goodbye"));
    }

    #[test]
    fn test_is_valid_split_content_rejects_garbage() {
        assert!(!is_valid_split_content("not blocks at all", "some text"));
        assert!(!is_valid_split_content("1\nonly two lines", "some text"));
    }

    #[test]
    fn test_is_valid_split_content_length_budget() {
        let content = "1\n[你好]\n[hi]\n";
        let too_different = "x".repeat(250);
        assert!(!is_valid_split_content(content, &too_different));
    }

    #[test]
    fn test_is_valid_split_content_empty_marker() {
        assert!(is_valid_split_content("[无文本]", ""));
        assert!(is_valid_split_content("[无文本]", "short"));
        assert!(!is_valid_split_content(
            "[无文本]",
            "a transcript that clearly has plenty of text"
        ));
    }

    #[test]
    fn test_context_window() {
        let sentences: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
        assert_eq!(context_window(&sentences, 0, true), "");
        assert_eq!(context_window(&sentences, 5, true), "s2\ns3\ns4");
        assert_eq!(context_window(&sentences, 5, false), "s6\ns7\ns8");
        assert_eq!(context_window(&sentences, 9, false), "");
    }

    #[tokio::test]
    async fn test_translate_preserves_count_on_failure() {
        let chat = Arc::new(EchoChat {
            fail_on: Some(1),
            calls: AtomicUsize::new(0),
        });
        let translator = Translator::new(chat, 1, 64);
        let sentences = vec![
            "Hi.".to_string(),
            "How are you?".to_string(),
            "Bye.".to_string(),
        ];
        let results = translator.translate_sentences(&sentences, "zh").await;

        assert_eq!(results.len(), 3);
        // With parallelism 1 the failing call is deterministic: the second
        // sentence falls back to its source text.
        assert_eq!(results[1].translated, results[1].origin);
        assert!(results[0].translated.starts_with("译:"));
        assert!(results[2].translated.starts_with("译:"));
    }

    #[tokio::test]
    async fn test_translate_empty_input() {
        let chat = Arc::new(EchoChat {
            fail_on: None,
            calls: AtomicUsize::new(0),
        });
        let translator = Translator::new(chat, 4, 64);
        let results = translator.translate_sentences(&[], "zh").await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_split_and_translate_retries_until_valid() {
        let good = "1\n[你好]\n[hello there]\n".to_string();
        let chat = Arc::new(ScriptedChat::new(vec![
            Err("transient".to_string()),
            Ok("garbage response".to_string()),
            Ok(good.clone()),
        ]));
        let translator = Translator::new(chat.clone(), 4, 64);
        let result = translator
            .split_and_translate("hello there", "zh", false)
            .await
            .unwrap();
        assert_eq!(result, good);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_split_and_translate_gives_up_after_budget() {
        let chat = Arc::new(ScriptedChat::new(vec![Ok("garbage".to_string())]));
        let translator = Translator::new(chat.clone(), 4, 64);
        let result = translator
            .split_and_translate("hello there", "zh", false)
            .await;
        assert!(result.is_err());
        assert_eq!(chat.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_split_and_translate_empty_transcript() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let translator = Translator::new(chat.clone(), 4, 64);
        let result = translator.split_and_translate("", "zh", false).await.unwrap();
        assert!(result.contains(prompts::EMPTY_TRANSCRIPT_MARKER));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shorten_sentences_uses_llm() {
        let long: String = "word ".repeat(30).trim().to_string();
        let half = "word ".repeat(15).trim().to_string();
        let response = format!(
            "{{\"short_sentences\": [{{\"text\": \"{half}\"}}, {{\"text\": \"{half}\"}}]}}"
        );
        let chat = Arc::new(ScriptedChat::new(vec![Ok(response)]));
        let translator = Translator::new(chat, 4, 80);
        let result = translator.shorten_sentences(vec![long]).await;
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], half);
    }

    #[tokio::test]
    async fn test_shorten_sentences_returns_original_on_failure() {
        let long: String = "word ".repeat(30).trim().to_string();
        let chat = Arc::new(ScriptedChat::new(vec![Ok("not json".to_string())]));
        let translator = Translator::new(chat, 4, 80);
        let result = translator.shorten_sentences(vec![long.clone()]).await;
        assert_eq!(result, vec![long]);
    }

    #[tokio::test]
    async fn test_shorten_sentences_passes_short_through() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let translator = Translator::new(chat.clone(), 4, 64);
        let result = translator
            .shorten_sentences(vec!["short enough".to_string()])
            .await;
        assert_eq!(result, vec!["short enough".to_string()]);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }
}
