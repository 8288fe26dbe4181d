//! OpenAI-compatible client covering all three provider capabilities.
//!
//! One call equals one attempt; retry budgets live at the pipeline
//! boundaries, so the client never retries internally.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SublingoError};
use crate::providers::{ChatCompleter, SpeechSynthesizer, Transcriber, Transcription, Word};

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    asr_model: String,
    tts_model: String,
}

impl OpenAiClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SublingoError::Config("API key not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: config.chat_model.clone(),
            asr_model: config.asr_model.clone(),
            tts_model: config.tts_model.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn build_transcription_form(&self, audio: &Path, language: &str) -> Result<Form> {
        let bytes = fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        let mime = match audio.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("ogg") => "audio/ogg",
            _ => "application/octet-stream",
        };
        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.asr_model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }
        Ok(form)
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        _workspace: &Path,
    ) -> Result<Transcription> {
        let form = self.build_transcription_form(audio, language).await?;
        let response = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error("transcription", status, &body));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)?;
        debug!(
            words = parsed.words.as_ref().map(|w| w.len()).unwrap_or(0),
            "transcription received"
        );

        let words = parsed
            .words
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(num, w)| Word {
                num,
                text: w.word.trim().to_string(),
                start: w.start,
                end: w.end,
            })
            .collect();

        Ok(Transcription {
            language: parsed.language.unwrap_or_else(|| language.to_string()),
            text: parsed.text.trim().to_string(),
            words,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl ChatCompleter for OpenAiClient {
    async fn chat_completion(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are an assistant that helps with subtitle segmentation and translation.".to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.3,
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error("chat completion", status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SublingoError::Api("chat completion returned no choices".to_string()))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        let request = SpeechRequest {
            model: self.tts_model.clone(),
            input: text.to_string(),
            voice: voice.to_string(),
            response_format: "wav",
        };

        let response = self
            .client
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error("speech synthesis", status, &body));
        }

        let bytes = response.bytes().await?;
        fs::write(output, &bytes).await?;
        Ok(())
    }
}

fn api_error(what: &str, status: reqwest::StatusCode, body: &str) -> SublingoError {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        return SublingoError::Api(format!("{what} error: {}", parsed.error.message));
    }
    let snippet: String = body.chars().take(200).collect();
    SublingoError::Api(format!("{what} error ({status}): {snippet}"))
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct SpeechRequest {
    model: String,
    input: String,
    voice: String,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    words: Option<Vec<TranscriptionWord>>,
}

#[derive(Deserialize)]
struct TranscriptionWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> OpenAiClient {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        OpenAiClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = Config::default();
        assert!(OpenAiClient::from_config(&config).is_err());
    }

    #[test]
    fn test_url_join() {
        let client = test_client();
        assert_eq!(
            client.url("/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_transcription_response_parsing() {
        let body = r#"{
            "text": " Hello world ",
            "language": "english",
            "words": [
                {"word": " Hello", "start": 0.0, "end": 0.4},
                {"word": "world", "start": 0.4, "end": 0.9}
            ]
        }"#;
        let parsed: TranscriptionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text.trim(), "Hello world");
        assert_eq!(parsed.words.unwrap().len(), 2);
    }

    #[test]
    fn test_api_error_extracts_message() {
        let err = api_error(
            "chat completion",
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "bad key"}}"#,
        );
        assert!(err.to_string().contains("bad key"));
    }
}
