//! Error types for voxcast-engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.

use thiserror::Error;

/// Main error type for the voxcast engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio fragment decode errors (malformed PCM payloads)
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Audio capture device errors
    #[error("Audio capture error: {0}")]
    Capture(String),

    /// Live transport errors (open/send/close failures)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Speech synthesis backend errors
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
