//! Capture session: owns the audio resources for one stream and drives every
//! frame through silence detection, resampling and encoding.
//!
//! ```text
//!  Idle --start()--> Starting --ok--> Active --stop()--> Stopping --> Idle
//!                        |                                  ^
//!                        +--------- acquisition failed -----+ (back to Idle)
//! ```
//!
//! All operations take `&mut self`, so transitions and frame processing are
//! serialized by ownership. Sources deliver frames into a bounded channel that
//! the owner drains with [`CaptureSession::pump`] or
//! [`CaptureSession::pump_timeout`]; frames can also be pushed directly with
//! [`CaptureSession::process_frame`].

pub mod events;

pub use events::{
    ChannelEvents, ChunkFormat, ChunkWriter, CollectorEvents, SessionEvent, SessionEvents,
};

use crate::audio::clock::{Clock, SystemClock};
use crate::audio::encode::EncodedChunk;
use crate::audio::frame::SampleFrame;
use crate::audio::resample::resample;
use crate::audio::silence::SilenceDetector;
use crate::audio::source::{
    AudioSource, CaptureRequest, FrameReceiver, OutputSink, SourceHandle,
};
use crate::config::SessionConfig;
use crate::defaults;
use crate::error::{Result, VoiceStreamError};
use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Counters for the current (or most recent) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames that produced a chunk.
    pub frames_processed: u64,
    /// Frames reported as processing failures.
    pub frames_failed: u64,
    /// Frames discarded because the session was not active.
    pub frames_dropped: u64,
    /// Silence crossings reported.
    pub silences: u64,
}

/// Resources held while the session is active.
struct ActiveCapture<C: Clock> {
    frames: FrameReceiver,
    handle: Box<dyn SourceHandle>,
    output: Option<Box<dyn OutputSink>>,
    detector: Option<SilenceDetector<C>>,
}

/// A single audio stream from acquisition to release.
pub struct CaptureSession<S, E, C = SystemClock>
where
    S: AudioSource,
    E: SessionEvents,
    C: Clock + Clone,
{
    source: S,
    events: E,
    config: SessionConfig,
    clock: C,
    state: SessionState,
    active: Option<ActiveCapture<C>>,
    stats: SessionStats,
}

impl<S: AudioSource, E: SessionEvents> CaptureSession<S, E, SystemClock> {
    /// Creates an idle session. Nothing is acquired until [`start`].
    ///
    /// [`start`]: CaptureSession::start
    pub fn new(source: S, config: SessionConfig, events: E) -> Result<Self> {
        Self::with_clock(source, config, events, SystemClock)
    }
}

impl<S, E, C> CaptureSession<S, E, C>
where
    S: AudioSource,
    E: SessionEvents,
    C: Clock + Clone,
{
    /// Creates an idle session whose silence timing reads from `clock`.
    pub fn with_clock(source: S, config: SessionConfig, events: E, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            events,
            config,
            clock,
            state: SessionState::Idle,
            active: None,
            stats: SessionStats::default(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Sample rate reported by the acquired source, while active.
    pub fn source_sample_rate(&self) -> Option<u32> {
        self.active.as_ref().map(|active| active.handle.sample_rate())
    }

    /// Acquires the source and output sink and becomes active.
    ///
    /// Does nothing if the session is already starting or active. On failure
    /// everything acquired so far is released, the error is reported through
    /// `on_error` and returned, and the session is idle again.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::debug!(state = %self.state, "Start ignored, session not idle");
            return Ok(());
        }

        self.state = SessionState::Starting;
        match self.acquire() {
            Ok(active) => {
                tracing::info!(
                    source = self.source.name(),
                    source_rate = active.handle.sample_rate(),
                    target_rate = self.config.target_sample_rate,
                    buffer_size = self.config.buffer_size,
                    output = active.output.is_some(),
                    silence_detection = active.detector.is_some(),
                    "Capture session started"
                );
                self.active = Some(active);
                self.stats = SessionStats::default();
                self.state = SessionState::Active;
                self.events.on_start();
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                tracing::warn!("Capture session failed to start: {}", e);
                self.events.on_error(&e);
                Err(e)
            }
        }
    }

    fn acquire(&mut self) -> Result<ActiveCapture<C>> {
        let (tx, frames) = crossbeam_channel::bounded(defaults::FRAME_QUEUE_DEPTH);
        let request = CaptureRequest {
            buffer_size: self.config.buffer_size,
            target_sample_rate: self.config.target_sample_rate,
        };

        let mut handle = self
            .source
            .acquire(&request, tx)
            .map_err(as_acquisition_failure)?;

        let output = if self.config.route_to_output_sink {
            match handle.open_output(self.config.target_sample_rate) {
                Ok(output) => output,
                Err(e) => {
                    if let Err(release_err) = handle.release() {
                        self.report_release_failure("audio source", release_err);
                    }
                    return Err(as_acquisition_failure(e));
                }
            }
        } else {
            None
        };

        let detector = self.config.enable_silence_detection.then(|| {
            SilenceDetector::with_clock(self.config.silence_config(), self.clock.clone())
        });

        Ok(ActiveCapture {
            frames,
            handle,
            output,
            detector,
        })
    }

    /// Releases everything and returns to idle. Does nothing unless active.
    ///
    /// Never fails: each release step is attempted and any failure is
    /// reported through `on_error` as a release failure.
    pub fn stop(&mut self) {
        if self.state != SessionState::Active {
            tracing::debug!(state = %self.state, "Stop ignored, session not active");
            return;
        }

        self.state = SessionState::Stopping;
        if let Some(active) = self.active.take() {
            self.release(active);
        }
        self.state = SessionState::Idle;

        tracing::info!(
            processed = self.stats.frames_processed,
            failed = self.stats.frames_failed,
            dropped = self.stats.frames_dropped,
            "Capture session stopped"
        );
        self.events.on_stop();
    }

    fn release(&mut self, active: ActiveCapture<C>) {
        let ActiveCapture {
            frames,
            handle,
            output,
            detector,
        } = active;

        // Detach first so nothing queued after this point is processed.
        let late = frames.try_iter().count() as u64;
        drop(frames);
        if late > 0 {
            self.stats.frames_dropped += late;
            tracing::debug!(late, "Dropped frames queued after stop");
        }

        if let Some(output) = output {
            if let Err(e) = output.close() {
                self.report_release_failure("output sink", e);
            }
        }

        if let Err(e) = handle.release() {
            self.report_release_failure("audio source", e);
        }

        if let Some(mut detector) = detector {
            detector.reset();
        }
    }

    fn report_release_failure(&mut self, resource: &'static str, error: VoiceStreamError) {
        let error = match error {
            e @ VoiceStreamError::ReleaseFailure { .. } => e,
            other => VoiceStreamError::release(resource, other.to_string()),
        };
        tracing::warn!("{}", error);
        self.events.on_error(&error);
    }

    /// Runs one frame through the pipeline.
    ///
    /// Frames given to an inactive session are dropped. When silence triggers
    /// an auto-stop, the frame's chunk is emitted before the session stops.
    pub fn process_frame(&mut self, frame: &SampleFrame) {
        if self.state != SessionState::Active {
            self.stats.frames_dropped += 1;
            tracing::debug!(
                sequence = frame.sequence,
                state = %self.state,
                "Frame dropped, session not active"
            );
            return;
        }

        if self.run_pipeline(frame) {
            tracing::info!("Silence detected, stopping capture");
            self.stop();
        }
    }

    /// Returns true when the frame asked for an auto-stop.
    fn run_pipeline(&mut self, frame: &SampleFrame) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        if let Err(e) = frame.validate() {
            self.stats.frames_failed += 1;
            tracing::warn!("{}", e);
            self.events.on_error(&e);
            return false;
        }

        let mut stop_requested = false;
        if let Some(detector) = active.detector.as_mut() {
            if detector.process(&frame.samples) {
                self.stats.silences += 1;
                self.events.on_silence();
                stop_requested = self.config.auto_stop_on_silence;
            }
        }

        let pcm = resample(
            &frame.samples,
            frame.sample_rate as f64,
            self.config.target_sample_rate as f64,
        );
        self.events.on_chunk(EncodedChunk::from_pcm(frame.sequence, &pcm));
        self.stats.frames_processed += 1;

        if let Some(output) = active.output.as_mut() {
            if let Err(e) = output.write(&pcm) {
                let e = as_processing_failure(e);
                tracing::warn!("{}", e);
                self.events.on_error(&e);
            }
        }

        stop_requested
    }

    fn handle_delivery(&mut self, delivery: Result<SampleFrame>) {
        match delivery {
            Ok(frame) => self.process_frame(&frame),
            Err(e) => {
                let e = as_processing_failure(e);
                self.stats.frames_failed += 1;
                tracing::warn!("{}", e);
                self.events.on_error(&e);
            }
        }
    }

    fn end_of_stream(&mut self) {
        tracing::info!("Audio source finished");
        self.stop();
    }

    /// Processes every frame already queued by the source, without waiting.
    ///
    /// Returns the number of deliveries handled. When the source has finished
    /// and its queue is empty, the session stops.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while self.state == SessionState::Active {
            let next = match self.active.as_ref() {
                Some(active) => active.frames.try_recv(),
                None => break,
            };
            match next {
                Ok(delivery) => {
                    self.handle_delivery(delivery);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.end_of_stream();
                    break;
                }
            }
        }
        handled
    }

    /// Waits up to `timeout` for a frame, then drains the queue like [`pump`].
    ///
    /// [`pump`]: CaptureSession::pump
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        if self.state != SessionState::Active {
            return 0;
        }
        let next = match self.active.as_ref() {
            Some(active) => active.frames.recv_timeout(timeout),
            None => return 0,
        };
        match next {
            Ok(delivery) => {
                self.handle_delivery(delivery);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                self.end_of_stream();
                0
            }
        }
    }
}

impl<S, E, C> Drop for CaptureSession<S, E, C>
where
    S: AudioSource,
    E: SessionEvents,
    C: Clock + Clone,
{
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            self.stop();
        }
    }
}

fn as_acquisition_failure(error: VoiceStreamError) -> VoiceStreamError {
    match error {
        e @ (VoiceStreamError::AcquisitionFailure { .. }
        | VoiceStreamError::AudioDeviceNotFound { .. }) => e,
        other => VoiceStreamError::acquisition(other.to_string()),
    }
}

fn as_processing_failure(error: VoiceStreamError) -> VoiceStreamError {
    match error {
        e @ VoiceStreamError::ProcessingFailure { .. } => e,
        other => VoiceStreamError::processing(other.to_string()),
    }
}
