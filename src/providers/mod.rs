//! Provider contracts for speech recognition, chat completion, and speech
//! synthesis, plus the config-driven factory that selects concrete clients.

pub mod openai;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Result, SublingoError};

/// One recognized token with timing.
///
/// `num` is the reception ordinal within a segment's transcription. It is
/// strictly increasing by arrival, not necessarily by time; downstream
/// alignment tolerates out-of-order timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub num: usize,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Result of transcribing one audio segment. Empty text is legal and
/// means the segment was silent.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub language: String,
    pub text: String,
    pub words: Vec<Word>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file, returning text and word-level timing when
    /// the provider supplies it.
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        workspace: &Path,
    ) -> Result<Transcription>;

    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn chat_completion(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice into a wav file at `output`.
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()>;
}

/// The set of providers a pipeline holds, one per capability.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatCompleter>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

/// Build the provider set named by the configuration.
pub fn build_providers(config: &Config) -> Result<Providers> {
    match config.provider.as_str() {
        "openai" => {
            let client = Arc::new(openai::OpenAiClient::from_config(config)?);
            Ok(Providers {
                transcriber: client.clone(),
                chat: client.clone(),
                tts: client,
            })
        }
        other => Err(SublingoError::Config(format!(
            "unknown provider '{other}', expected one of: openai"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_providers_openai() {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let providers = build_providers(&config).unwrap();
        assert_eq!(providers.transcriber.name(), "openai");
    }

    #[test]
    fn test_build_providers_unknown() {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            provider: "acme".to_string(),
            ..Default::default()
        };
        assert!(build_providers(&config).is_err());
    }
}
