//! voicestream - live audio capture as base64 PCM chunks
//!
//! Captures audio from a source, resamples it to a target rate, quantizes to
//! 16-bit PCM and emits one base64 chunk per frame, with optional silence
//! detection and auto-stop.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod session;

// Sources (input side)
pub use audio::source::{
    AudioSource, CaptureRequest, MockAudioSource, MockFrame, OutputSink, SourceHandle,
};
pub use audio::wav::WavFileSource;
#[cfg(feature = "cpal-audio")]
pub use audio::capture::CpalAudioSource;

// Processing stages
pub use audio::clock::{Clock, ManualClock, SystemClock};
pub use audio::encode::EncodedChunk;
pub use audio::frame::SampleFrame;
pub use audio::silence::{SilenceDetector, SilenceDetectorConfig};

// Session
pub use session::{
    CaptureSession, ChannelEvents, ChunkFormat, ChunkWriter, CollectorEvents, SessionEvent,
    SessionEvents, SessionState, SessionStats,
};

// Error handling
pub use error::{ErrorKind, Result, VoiceStreamError};

// Config
pub use config::{AudioConfig, Config, SessionConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
