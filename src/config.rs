use crate::error::{Result, SublingoError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration.
///
/// Loaded from `<config dir>/sublingo/config.toml` when present, then
/// overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the OpenAI-compatible provider.
    pub api_key: Option<String>,
    /// Base URL for the provider; the default public endpoint when empty.
    pub base_url: String,
    /// Provider selector. Currently "openai".
    pub provider: String,
    /// Chat model used for splitting and translation.
    pub chat_model: String,
    /// Transcription model.
    pub asr_model: String,
    /// Speech synthesis model.
    pub tts_model: String,

    /// Nominal segment length L in seconds for the planner.
    pub segment_seconds: f64,
    /// Cap on concurrent translation workers.
    pub translate_parallel: usize,
    /// Upper bound on a translatable sentence's effective character count.
    pub max_sentence_length: usize,
    /// Consecutive subtitle lines merged per dubbing group.
    pub tts_group_size: usize,
    /// Word budget per short-origin fragment line.
    pub words_per_line: usize,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
    /// Cookies file handed to the downloader when present.
    pub cookies_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            provider: "openai".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            asr_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            segment_seconds: 300.0,
            translate_parallel: 6,
            max_sentence_length: 64,
            tts_group_size: 4,
            words_per_line: 8,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            cookies_file: Some(PathBuf::from("./cookies.txt")),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                match toml::from_str::<Config>(&contents) {
                    Ok(file_config) => config = file_config,
                    Err(e) => {
                        return Err(SublingoError::Config(format!(
                            "failed to parse {}: {e}",
                            config_path.display()
                        )))
                    }
                }
            }
        }

        if let Ok(key) = std::env::var("SUBLINGO_API_KEY") {
            config.api_key = Some(key);
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("SUBLINGO_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("SUBLINGO_CHAT_MODEL") {
            config.chat_model = model;
        }
        if let Ok(n) = std::env::var("SUBLINGO_TRANSLATE_PARALLEL") {
            if let Ok(n) = n.parse() {
                config.translate_parallel = n;
            }
        }
        if let Ok(n) = std::env::var("SUBLINGO_SEGMENT_SECONDS") {
            if let Ok(n) = n.parse() {
                config.segment_seconds = n;
            }
        }
        if let Ok(path) = std::env::var("SUBLINGO_FFMPEG") {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("SUBLINGO_FFPROBE") {
            config.ffprobe_path = path;
        }
        if let Ok(path) = std::env::var("SUBLINGO_YTDLP") {
            config.ytdlp_path = path;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(SublingoError::Config(
                "API key not set. Export SUBLINGO_API_KEY or OPENAI_API_KEY.".to_string(),
            ));
        }
        if self.translate_parallel == 0 {
            return Err(SublingoError::Config(
                "translate_parallel must be greater than 0".to_string(),
            ));
        }
        if self.segment_seconds <= 0.0 {
            return Err(SublingoError::Config(
                "segment_seconds must be positive".to_string(),
            ));
        }
        if self.max_sentence_length == 0 {
            return Err(SublingoError::Config(
                "max_sentence_length must be greater than 0".to_string(),
            ));
        }
        if self.tts_group_size == 0 || self.words_per_line == 0 {
            return Err(SublingoError::Config(
                "tts_group_size and words_per_line must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sublingo").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.segment_seconds, 300.0);
        assert_eq!(config.translate_parallel, 6);
        assert_eq!(config.tts_group_size, 4);
        assert_eq!(config.provider, "openai");
    }

    #[test]
    fn test_validate_missing_api_key() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_with_api_key() {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            translate_parallel: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.segment_seconds, config.segment_seconds);
        assert_eq!(parsed.chat_model, config.chat_model);
    }
}
