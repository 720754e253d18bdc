//! Error types shared across the server and the voice client.

use thiserror::Error;

/// Failure of a remote chat-completion call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("API key not set (expected ${0})")]
    MissingApiKey(String),

    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// Failure while writing a session record to the history log.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("session summary failed: {0}")]
    Summary(#[from] ModelError),

    #[error("history log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a host speech engine.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("recognition engine failed: {0}")]
    Recognition(String),
}
