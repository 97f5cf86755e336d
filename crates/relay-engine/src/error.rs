//! Error types for the engine.

use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No output definition registered under this id.
    #[error("Unknown output type: {0}")]
    UnknownOutput(String),

    /// An output definition with this id is already registered.
    #[error("Output type already registered: {0}")]
    AlreadyRegistered(String),

    /// The output definition refused to create an instance.
    #[error("Failed to create output '{id}': {message}")]
    OutputCreate { id: String, message: String },

    /// The output has been destroyed.
    #[error("Output closed")]
    OutputClosed,

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid video configuration.
    #[error("Invalid video settings: {0}")]
    InvalidVideo(String),

    /// Invalid audio configuration.
    #[error("Invalid audio settings: {0}")]
    InvalidAudio(String),

    /// Video cannot be reset while outputs are capturing.
    #[error("Video is currently active ({0} outputs capturing)")]
    VideoActive(usize),

    /// Video has not been reset yet.
    #[error("Video not initialized")]
    NoVideo,

    /// Encoder initialization failed.
    #[error("Encoder '{name}' initialization failed: {message}")]
    EncoderInit { name: String, message: String },

    /// Settings could not be parsed.
    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    /// Capture thread could not be spawned.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn encoder_init(name: &str, message: impl Into<String>) -> Self {
        Self::EncoderInit {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
