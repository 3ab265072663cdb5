//! Microphone capture and speaker output using CPAL.

use crate::audio::frame::FrameAssembler;
use crate::audio::source::{AudioSource, CaptureRequest, FrameSender, OutputSink, SourceHandle};
use crate::error::{Result, VoiceStreamError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Queued output chunks before writes start dropping.
const OUTPUT_QUEUE_DEPTH: usize = 16;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Hides the ALSA/JACK chatter CPAL triggers while probing backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "digital output",
    "hdmi",
    "s/pdif",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// An input device as shown by `voicestream devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub recommended: bool,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.recommended {
            write!(f, "{} [recommended]", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// List usable input devices, skipping outputs that show up as inputs.
///
/// # Errors
/// Returns `AcquisitionFailure` if device enumeration fails.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| {
        VoiceStreamError::acquisition(format!("Failed to enumerate input devices: {}", e))
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| DeviceInfo {
            recommended: is_preferred_device(&name),
            name,
        })
        .collect())
}

/// Get the best default input device, preferring PipeWire/PulseAudio.
fn get_best_default_device(host: &cpal::Host) -> Result<cpal::Device> {
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if device.name().is_ok_and(|name| is_preferred_device(&name)) {
                return Ok(device);
            }
        }
    }

    host.default_input_device()
        .ok_or_else(|| VoiceStreamError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
}

fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        let Some(name) = device_name else {
            return get_best_default_device(&host);
        };

        let devices = host.input_devices().map_err(|e| {
            VoiceStreamError::acquisition(format!("Failed to enumerate devices: {}", e))
        })?;

        devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|dev_name| dev_name == name))
            .ok_or_else(|| VoiceStreamError::AudioDeviceNotFound {
                device: name.to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by exactly one handle or sink, which is only
/// ever touched by the session that holds it.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source.
///
/// Captures at the device's native configuration and delivers the first
/// channel as normalized frames; the session does the resampling.
pub struct CpalAudioSource {
    device_name: Option<String>,
}

impl CpalAudioSource {
    /// Create a source for `device_name`, or the best default input when None.
    ///
    /// The device is looked up again on every acquisition so a restarted
    /// session picks up hot-plugged hardware.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        find_input_device(device_name)?;
        Ok(Self {
            device_name: device_name.map(str::to_string),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn acquire(
        &mut self,
        request: &CaptureRequest,
        frames: FrameSender,
    ) -> Result<Box<dyn SourceHandle>> {
        use cpal::SampleFormat;

        let device = find_input_device(self.device_name.as_deref())?;
        let default_config = device.default_input_config().map_err(|e| {
            VoiceStreamError::acquisition(format!("Failed to query default input config: {}", e))
        })?;

        let sample_rate = default_config.sample_rate().0;
        let stream_config: cpal::StreamConfig = default_config.clone().into();
        let input = InputSpec {
            channels: default_config.channels().max(1) as usize,
            sample_rate,
            frame_size: request.buffer_size,
        };
        let dropped = Arc::new(AtomicU64::new(0));

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels = input.channels,
            format = ?default_config.sample_format(),
            "Opening input stream"
        );

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => {
                build_input::<i16>(&device, &stream_config, &input, frames, &dropped)
            }
            SampleFormat::F32 => {
                build_input::<f32>(&device, &stream_config, &input, frames, &dropped)
            }
            fmt => Err(VoiceStreamError::acquisition(format!(
                "Unsupported native sample format: {:?}. Try specifying a device with --device.",
                fmt
            ))),
        }?;

        stream.play().map_err(|e| {
            VoiceStreamError::acquisition(format!("Failed to start audio stream: {}", e))
        })?;

        Ok(Box::new(CpalHandle {
            stream: Some(SendableStream(stream)),
            sample_rate,
            dropped,
        }))
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

struct InputSpec {
    channels: usize,
    sample_rate: u32,
    frame_size: usize,
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    input: &InputSpec,
    frames: FrameSender,
    dropped: &Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = input.channels;
    let mut assembler = FrameAssembler::new(input.frame_size, input.sample_rate);
    let mut first_channel = Vec::new();
    let error_frames = frames.clone();
    let dropped = Arc::clone(dropped);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                first_channel.clear();
                first_channel.extend(data.iter().step_by(channels).map(|s| s.to_sample::<f32>()));
                for frame in assembler.push(&first_channel) {
                    if frames.try_send(Ok(frame)).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                tracing::error!("Audio stream error: {}", err);
                let failure = VoiceStreamError::processing(format!("Audio stream error: {}", err));
                if error_frames.try_send(Err(failure)).is_err() {
                    tracing::debug!("Stream error not delivered, frame queue unavailable");
                }
            },
            None,
        )
        .map_err(|e| VoiceStreamError::acquisition(format!("Failed to build input stream: {}", e)))
}

struct CpalHandle {
    stream: Option<SendableStream>,
    sample_rate: u32,
    dropped: Arc<AtomicU64>,
}

impl SourceHandle for CpalHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_output(&mut self, sample_rate: u32) -> Result<Option<Box<dyn OutputSink>>> {
        let sink = CpalOutputSink::open(sample_rate)?;
        Ok(Some(Box::new(sink)))
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "Input frames dropped on a full queue");
        }

        match self.stream.take() {
            Some(SendableStream(stream)) => stream.pause().map_err(|e| {
                VoiceStreamError::release("input stream", format!("Failed to stop audio stream: {}", e))
            }),
            None => Ok(()),
        }
    }
}

/// Plays processed PCM on the default output device.
pub struct CpalOutputSink {
    stream: Option<SendableStream>,
    queue: crossbeam_channel::Sender<Vec<i16>>,
    dropped: u64,
}

impl CpalOutputSink {
    /// Opens the default output device as mono at `sample_rate`.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let device = with_suppressed_stderr(|| cpal::default_host().default_output_device())
            .ok_or_else(|| VoiceStreamError::AudioDeviceNotFound {
                device: "default output".to_string(),
            })?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let (queue, pending) = crossbeam_channel::bounded(OUTPUT_QUEUE_DEPTH);

        let stream = match build_output::<i16>(&device, &config, pending.clone()) {
            Ok(stream) => stream,
            Err(_) => build_output::<f32>(&device, &config, pending)?,
        };

        stream.play().map_err(|e| {
            VoiceStreamError::acquisition(format!("Failed to start output stream: {}", e))
        })?;

        tracing::debug!(sample_rate, "Output stream opened");

        Ok(Self {
            stream: Some(SendableStream(stream)),
            queue,
            dropped: 0,
        })
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    pending: crossbeam_channel::Receiver<Vec<i16>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let mut buffered: VecDeque<i16> = VecDeque::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                while buffered.len() < data.len() {
                    match pending.try_recv() {
                        Ok(chunk) => buffered.extend(chunk),
                        Err(_) => break,
                    }
                }
                for out in data.iter_mut() {
                    *out = T::from_sample(buffered.pop_front().unwrap_or(0));
                }
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| VoiceStreamError::acquisition(format!("Failed to build output stream: {}", e)))
}

impl OutputSink for CpalOutputSink {
    fn write(&mut self, pcm: &[i16]) -> Result<()> {
        match self.queue.try_send(pcm.to_vec()) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(
                VoiceStreamError::processing("Output stream is no longer running"),
            ),
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, "Output chunks dropped on a full queue");
        }

        match self.stream.take() {
            Some(SendableStream(stream)) => stream.pause().map_err(|e| {
                VoiceStreamError::release("output stream", format!("Failed to stop output stream: {}", e))
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_device_info_display_marks_recommended() {
        let device = DeviceInfo {
            name: "pipewire".to_string(),
            recommended: true,
        };
        assert_eq!(device.to_string(), "pipewire [recommended]");

        let device = DeviceInfo {
            name: "hw:0,0".to_string(),
            recommended: false,
        };
        assert_eq!(device.to_string(), "hw:0,0");
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_filters_outputs() {
        let devices = list_devices().unwrap();
        for device in &devices {
            assert!(!should_filter_device(&device.name));
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_create_with_invalid_device_name() {
        match CpalAudioSource::new(Some("NonExistentDevice12345")) {
            Err(VoiceStreamError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            _ => panic!("Expected AudioDeviceNotFound error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_acquire_delivers_frames() {
        let mut source = CpalAudioSource::new(None).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(crate::defaults::FRAME_QUEUE_DEPTH);
        let request = CaptureRequest {
            buffer_size: 1024,
            target_sample_rate: 16000,
        };

        let handle = source.acquire(&request, tx).unwrap();
        let frame = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(frame.len(), 1024);
        assert_eq!(frame.sample_rate, handle.sample_rate());
        handle.release().unwrap();
    }
}
