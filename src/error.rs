use thiserror::Error;

#[derive(Error, Debug)]
pub enum SublingoError {
    #[error("media tool failed: {0}")]
    Media(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("alignment failed: {0}")]
    Alignment(String),

    #[error("speech synthesis failed: {0}")]
    Tts(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("subtitle parse error: {0}")]
    SrtParse(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SublingoError>;
