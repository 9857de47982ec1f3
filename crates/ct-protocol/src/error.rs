//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding control frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Control frame names a command outside the known set
    #[error("Unknown control command: {0}")]
    UnknownCommand(String),

    /// A required detail key is absent
    #[error("Control frame '{command}' is missing detail '{key}'")]
    MissingDetail { command: String, key: String },

    /// A detail value could not be parsed
    #[error("Control frame '{command}' has invalid detail '{key}': {value}")]
    InvalidDetail {
        command: String,
        key: String,
        value: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
