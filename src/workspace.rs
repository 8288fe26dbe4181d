//! Deterministic file names inside a task's workspace directory.
//!
//! Per-segment names embed the 0-based segment index so parallel stages
//! never collide.

pub const AUDIO_FILE: &str = "audio.mp3";
pub const ORIGIN_NO_TS_FILE: &str = "origin_nots.srt";
pub const BILINGUAL_FILE: &str = "bilingual.srt";
pub const SHORT_ORIGIN_MIXED_FILE: &str = "short_origin_mixed.srt";
pub const SHORT_ORIGIN_FILE: &str = "short_origin.srt";
pub const ORIGIN_SRT_FILE: &str = "origin.srt";
pub const TARGET_SRT_FILE: &str = "target.srt";
pub const TTS_SILENCE_FILE: &str = "silence_0.wav";
pub const TTS_FINAL_AUDIO_FILE: &str = "tts_final_audio.wav";
pub const TTS_SRT_FILE: &str = "tts_adjusted.srt";

pub fn split_audio_file(index: usize) -> String {
    format!("split_audio_{index}.mp3")
}

/// printf-style pattern handed to ffmpeg's segment muxer.
pub fn split_audio_pattern() -> String {
    "split_audio_%d.mp3".to_string()
}

pub fn split_origin_no_ts_file(index: usize) -> String {
    format!("split_origin_nots_{index}.srt")
}

pub fn split_bilingual_file(index: usize) -> String {
    format!("split_bilingual_{index}.srt")
}

pub fn split_short_origin_mixed_file(index: usize) -> String {
    format!("split_short_origin_mixed_{index}.srt")
}

pub fn split_short_origin_file(index: usize) -> String {
    format!("split_short_origin_{index}.srt")
}

pub fn tts_line_file(index: usize) -> String {
    format!("tts_{index}.wav")
}

pub fn tts_group_file(begin: usize, end: usize) -> String {
    format!("tts_group_{begin}_{end}.wav")
}

pub fn tts_output_video_file(video_ext: &str) -> String {
    format!("output_tts.{video_ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_names_embed_index() {
        assert_eq!(split_audio_file(0), "split_audio_0.mp3");
        assert_eq!(split_origin_no_ts_file(3), "split_origin_nots_3.srt");
        assert_eq!(split_bilingual_file(12), "split_bilingual_12.srt");
        assert_eq!(tts_group_file(4, 8), "tts_group_4_8.wav");
    }
}
