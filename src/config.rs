use crate::audio::silence::SilenceDetectorConfig;
use crate::defaults;
use crate::error::{Result, VoiceStreamError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; None picks the best default device.
    pub device: Option<String>,
}

/// Capture session configuration, fixed for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Sample rate of the encoded output in Hz.
    pub target_sample_rate: u32,
    /// Samples per frame requested from the source.
    pub buffer_size: usize,
    pub enable_silence_detection: bool,
    /// Level in dBFS below which audio counts as silence.
    pub silence_threshold_db: f64,
    /// Continuous silence before the silence event fires.
    pub silence_duration_ms: u64,
    /// Stop the session when silence is detected.
    pub auto_stop_on_silence: bool,
    /// Also play processed audio on the source's output sink.
    pub route_to_output_sink: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: defaults::TARGET_SAMPLE_RATE,
            buffer_size: defaults::BUFFER_SIZE,
            enable_silence_detection: false,
            silence_threshold_db: defaults::SILENCE_THRESHOLD_DB,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            auto_stop_on_silence: false,
            route_to_output_sink: defaults::ROUTE_TO_OUTPUT_SINK,
        }
    }
}

impl SessionConfig {
    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.target_sample_rate == 0 {
            return Err(invalid("target_sample_rate", "must be greater than zero"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be greater than zero"));
        }
        if self.silence_threshold_db.is_nan() {
            return Err(invalid("silence_threshold_db", "must be a number"));
        }
        Ok(())
    }

    pub fn silence_config(&self) -> SilenceDetectorConfig {
        SilenceDetectorConfig {
            threshold_db: self.silence_threshold_db,
            duration: Duration::from_millis(self.silence_duration_ms),
        }
    }
}

fn invalid(key: &str, message: &str) -> VoiceStreamError {
    VoiceStreamError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML and unreadable files are still errors.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound);
                if missing {
                    tracing::debug!(path = %path.display(), "No config file, using defaults");
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOICESTREAM_AUDIO_DEVICE → audio.device
    /// - VOICESTREAM_TARGET_SAMPLE_RATE → session.target_sample_rate
    /// - VOICESTREAM_BUFFER_SIZE → session.buffer_size
    ///
    /// Empty values are ignored, as are numbers that do not parse.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(device) = env_value("VOICESTREAM_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }

        if let Some(rate) = env_parse("VOICESTREAM_TARGET_SAMPLE_RATE") {
            self.session.target_sample_rate = rate;
        }

        if let Some(size) = env_parse("VOICESTREAM_BUFFER_SIZE") {
            self.session.buffer_size = size;
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }

    /// Render as TOML, as it would be written to the config file.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voicestream/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicestream")
            .join("config.toml")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = env_value(key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", key, value);
            None
        }
    }
}
