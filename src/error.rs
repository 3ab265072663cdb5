//! Error types for voicestream.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceStreamError {
    // Session lifecycle errors
    #[error("Audio acquisition failed: {message}")]
    AcquisitionFailure { message: String },

    #[error("Frame processing failed: {message}")]
    ProcessingFailure { message: String },

    #[error("Failed to release {resource}: {message}")]
    ReleaseFailure {
        resource: &'static str,
        message: String,
    },

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`VoiceStreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Starting a session failed; the session is back to idle.
    Acquisition,
    /// A single frame could not be processed; the session keeps running.
    Processing,
    /// A resource could not be released cleanly during stop.
    Release,
    /// Configuration was rejected.
    Config,
    Other,
}

impl VoiceStreamError {
    pub fn acquisition(message: impl Into<String>) -> Self {
        Self::AcquisitionFailure {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingFailure {
            message: message.into(),
        }
    }

    pub fn release(resource: &'static str, message: impl Into<String>) -> Self {
        Self::ReleaseFailure {
            resource,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AcquisitionFailure { .. } | Self::AudioDeviceNotFound { .. } => {
                ErrorKind::Acquisition
            }
            Self::ProcessingFailure { .. } => ErrorKind::Processing,
            Self::ReleaseFailure { .. } => ErrorKind::Release,
            Self::ConfigInvalidValue { .. } | Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Fatal errors abort the transition that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Acquisition | ErrorKind::Config)
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoiceStreamError>;
