//! Error types for the toy voice pipeline

use thiserror::Error;

/// Result type alias for toy voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing binary, bad option)
    #[error("configuration error: {0}")]
    Config(String),

    /// Voice model or its companion config is unusable
    #[error("voice profile error: {0}")]
    VoiceProfile(String),

    /// Synthesis or player subprocess failure
    #[error("process error: {0}")]
    Process(String),

    /// Audio output error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed daemon request or reply
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with a failure code
    #[error("daemon error: {0}")]
    Daemon(String),

    /// Upstream language model error
    #[error("llm error: {0}")]
    Llm(String),

    /// Session memory error
    #[error("memory error: {0}")]
    Memory(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
