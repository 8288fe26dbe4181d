//! Prompt templates for the chat-completion provider.
//!
//! The split-and-translate prompts ask for numbered triplet blocks so the
//! response doubles as the no-timestamp per-segment subtitle file.

pub const EMPTY_TRANSCRIPT_MARKER: &str = "[无文本]";

pub fn split_and_translate_prompt(target_language: &str, modal_filter: bool) -> String {
    let filter_clause = if modal_filter {
        "Remove filler words and hesitations (um, uh, you know, 那个, 就是) from the original text before splitting. "
    } else {
        ""
    };
    format!(
        "You are a subtitle segmentation and translation assistant. \
Split the transcript below into short natural sentences, each suitable as one subtitle line, \
and translate every sentence into {target_language}. {filter_clause}\
Keep the original wording otherwise intact and do not merge distant sentences. \
Output one block per sentence, with this exact shape and nothing else:\n\
1\n[translated sentence]\n[original sentence]\n\n\
2\n[translated sentence]\n[original sentence]\n\n\
If the transcript is empty or unintelligible output exactly {EMPTY_TRANSCRIPT_MARKER}.\n\
Transcript:\n"
    )
}

pub fn translate_with_context_prompt(
    target_language: &str,
    previous: &str,
    sentence: &str,
    next: &str,
) -> String {
    format!(
        "Translate one sentence into {target_language}. \
The surrounding sentences are given only as context; do not translate them. \
Reply with the translated sentence only, no quotes, no commentary.\n\
Previous sentences:\n{previous}\n\
Sentence to translate:\n{sentence}\n\
Following sentences:\n{next}\n"
    )
}

pub fn split_long_sentence_prompt(sentence: &str) -> String {
    format!(
        "Split the sentence below into shorter sentences that each stand on their own. \
Do not change any words, only cut the sentence. \
Respond with JSON only, in this shape: \
{{\"short_sentences\": [{{\"text\": \"first part\"}}, {{\"text\": \"second part\"}}]}}\n\
Sentence: {sentence}"
    )
}

pub fn translate_title_and_description_prompt(target_language: &str, combined: &str) -> String {
    format!(
        "Translate the video title and description below into {target_language}. \
They are joined by ####; keep the #### separator in your answer and output \
nothing besides the translated title, the separator, and the translated description.\n{combined}"
    )
}
