//! Default configuration constants for voicestream.
//!
//! Shared by [`SessionConfig`](crate::config::SessionConfig), the config file
//! loader and the CLI so every entry point agrees on the same values.

/// Default target sample rate in Hz.
///
/// 16kHz is what most speech services expect for streamed recognition.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Default processing frame size in samples.
///
/// Consumed by audio sources when they block callback data into frames;
/// the session itself accepts frames of any length.
pub const BUFFER_SIZE: usize = 8192;

/// Default silence threshold in dBFS.
pub const SILENCE_THRESHOLD_DB: f64 = -50.0;

/// Default continuous silence in milliseconds before silence is reported.
pub const SILENCE_DURATION_MS: u64 = 1000;

/// Whether processed audio is routed to an output sink by default.
pub const ROUTE_TO_OUTPUT_SINK: bool = true;

/// Depth of the bounded channel between an audio source and its session.
///
/// At the default buffer size and a 48kHz device this is over five seconds
/// of audio; a source that outruns the session drops frames beyond it.
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// Log filter used by the binary when neither `VOICESTREAM_LOG` nor
/// `RUST_LOG` is set.
pub const LOG_FILTER: &str = "voicestream=info";
