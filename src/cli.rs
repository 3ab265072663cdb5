//! Command-line interface for voicestream
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Stream audio as base64 16-bit PCM chunks, one per line
#[derive(Parser, Debug)]
#[command(
    name = "voicestream",
    version,
    about = "Stream audio as base64 16-bit PCM chunks, one per line"
)]
pub struct Cli {
    /// Subcommand to execute (default: mic)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Overrides for the session section of the config file.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SessionArgs {
    /// Output sample rate in Hz (default: 16000)
    #[arg(long, global = true, value_name = "HZ")]
    pub target_rate: Option<u32>,

    /// Samples per captured frame (default: 8192)
    #[arg(long, global = true, value_name = "SAMPLES")]
    pub buffer_size: Option<usize>,

    /// Report silence on stderr / in JSON output
    #[arg(long, global = true)]
    pub silence_detection: bool,

    /// Silence threshold in dBFS (default: -50)
    #[arg(long, global = true, value_name = "DB", allow_negative_numbers = true)]
    pub silence_threshold_db: Option<f64>,

    /// Silence required before it is reported, in milliseconds (default: 1000)
    #[arg(long, global = true, value_name = "MS")]
    pub silence_duration_ms: Option<u64>,

    /// Stop when silence is detected (implies --silence-detection)
    #[arg(long, global = true)]
    pub auto_stop: bool,

    /// Do not play processed audio on the output device
    #[arg(long, global = true)]
    pub no_output_sink: bool,

    /// Audio input device (see `voicestream devices`)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Print one JSON object per event instead of bare chunks
    #[arg(long, global = true)]
    pub json: bool,

    /// Stop after this long. Examples: 30, 30s, 5m, 1h30m
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration)]
    pub max_duration: Option<Duration>,
}

impl SessionArgs {
    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        let session = &mut config.session;

        if let Some(rate) = self.target_rate {
            session.target_sample_rate = rate;
        }
        if let Some(size) = self.buffer_size {
            session.buffer_size = size;
        }
        if self.silence_detection {
            session.enable_silence_detection = true;
        }
        if let Some(db) = self.silence_threshold_db {
            session.silence_threshold_db = db;
        }
        if let Some(ms) = self.silence_duration_ms {
            session.silence_duration_ms = ms;
        }
        if self.auto_stop {
            session.enable_silence_detection = true;
            session.auto_stop_on_silence = true;
        }
        if self.no_output_sink {
            session.route_to_output_sink = false;
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
    }
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Capture from the microphone until Ctrl-C (default)
    Mic,

    /// Stream a WAV file through the same pipeline
    File {
        /// WAV file to read
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Deliver frames at playback speed instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// List available audio input devices
    Devices,

    /// Print the effective configuration as TOML
    Config,
}
