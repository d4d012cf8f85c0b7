//! Error types for Sonavox

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonavoxError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Engine error: {0}")]
    Engine(String),

    /// The bounded command queue rejected a command. This means the engine
    /// thread has stopped draining its queue.
    #[error("Engine command queue is full")]
    QueueFull,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, SonavoxError>;
