//! Language codes and the per-language behavior switches used across the
//! segmenter, translator, and aligner.

/// Normalize a user-supplied language code for the ASR provider.
///
/// Providers expect bare ISO codes; regional variants are folded.
pub fn normalize_asr_language(code: &str) -> &str {
    match code {
        "zh_cn" | "zh_tw" | "zh-cn" | "zh-tw" => "zh",
        other => other,
    }
}

/// Human-readable language name for LLM prompts.
pub fn language_name(code: &str) -> &'static str {
    match code.to_lowercase().as_str() {
        "en" => "English",
        "zh" | "zh_cn" | "zh-cn" => "Simplified Chinese",
        "zh_tw" | "zh-tw" => "Traditional Chinese",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "ms" => "Malay",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "cs" => "Czech",
        "sv" => "Swedish",
        "fi" => "Finnish",
        _ => "the target language",
    }
}

/// Languages whose sentences are aligned word-by-word against the ASR
/// stream. Everything else goes through the per-character dialect.
pub fn uses_word_alignment(code: &str) -> bool {
    matches!(normalize_asr_language(code), "en" | "de" | "tr" | "ru")
}

/// Languages written without spaces between words.
pub fn is_asian_language(code: &str) -> bool {
    matches!(normalize_asr_language(code), "zh" | "ja" | "ko" | "th")
}

/// Whether sentences in this language are joined with spaces.
pub fn joins_with_space(code: &str) -> bool {
    !is_asian_language(code)
}
