use crate::audio::frame::SampleFrame;
use crate::defaults;
use crate::error::{Result, VoiceStreamError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Sending half of the channel a source delivers frames into.
///
/// A source reports a frame it could not read as `Err`; the session turns it
/// into a processing failure and keeps running.
pub type FrameSender = crossbeam_channel::Sender<Result<SampleFrame>>;

/// Receiving half, owned by the session while it is active.
pub type FrameReceiver = crossbeam_channel::Receiver<Result<SampleFrame>>;

/// Parameters a session passes to its source at acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Samples per delivered frame.
    pub buffer_size: usize,
    /// Rate the session will resample to. Sources may use it to pick a
    /// device config but still report their own rate on every frame.
    pub target_sample_rate: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            buffer_size: defaults::BUFFER_SIZE,
            target_sample_rate: defaults::TARGET_SAMPLE_RATE,
        }
    }
}

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device, WAV file,
/// mock). Acquisition hands back a [`SourceHandle`] that owns whatever was
/// opened; frames flow through `frames` until the handle is released.
pub trait AudioSource: Send {
    /// Open the source and start delivering frames.
    ///
    /// Frames must be sent with `try_send` (or from a thread that may block);
    /// an audio callback must never wait on the session.
    fn acquire(
        &mut self,
        request: &CaptureRequest,
        frames: FrameSender,
    ) -> Result<Box<dyn SourceHandle>>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "source"
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn acquire(
        &mut self,
        request: &CaptureRequest,
        frames: FrameSender,
    ) -> Result<Box<dyn SourceHandle>> {
        (**self).acquire(request, frames)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Exclusive ownership of an acquired source.
pub trait SourceHandle: Send {
    /// Rate of the frames this handle delivers, in Hz.
    fn sample_rate(&self) -> u32;

    /// Open an output sink for processed audio at `sample_rate`.
    ///
    /// Returns `Ok(None)` when the source has nowhere to route audio.
    fn open_output(&mut self, _sample_rate: u32) -> Result<Option<Box<dyn OutputSink>>> {
        Ok(None)
    }

    /// Stop delivering frames and free the underlying resources.
    fn release(self: Box<Self>) -> Result<()>;
}

/// Destination for processed (resampled, quantized) audio.
pub trait OutputSink: Send {
    fn write(&mut self, pcm: &[i16]) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// One scripted delivery of the mock source.
#[derive(Debug, Clone, PartialEq)]
pub enum MockFrame {
    /// A frame of samples at the mock's sample rate.
    Samples(Vec<f32>),
    /// A failed read, delivered as `Err`.
    Failure(String),
}

/// Counters shared between a mock source, its handles and the test.
#[derive(Debug, Default)]
pub struct MockStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    outputs_opened: AtomicUsize,
    outputs_closed: AtomicUsize,
    samples_written: AtomicUsize,
    log: Mutex<Vec<&'static str>>,
}

impl MockStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_closed(&self) -> usize {
        self.outputs_closed.load(Ordering::SeqCst)
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written.load(Ordering::SeqCst)
    }

    /// Lifecycle calls in the order they happened.
    pub fn log(&self) -> Vec<&'static str> {
        self.log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn record(&self, entry: &'static str) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }
}

/// Pushes frames into whichever mock handle is currently acquired.
#[derive(Debug, Clone)]
pub struct MockInjector {
    sender: Arc<Mutex<Option<FrameSender>>>,
    sequence: Arc<AtomicU64>,
    sample_rate: u32,
}

impl MockInjector {
    /// Sends a frame at the mock's sample rate.
    ///
    /// Returns false when no handle is acquired or the queue is full.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.send(Ok(SampleFrame::new(samples, self.sample_rate, sequence)))
    }

    /// Sends a frame with an explicit sample rate.
    pub fn push_at(&self, samples: Vec<f32>, sample_rate: u32) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.send(Ok(SampleFrame::new(samples, sample_rate, sequence)))
    }

    /// Sends a failed read.
    pub fn push_failure(&self, message: &str) -> bool {
        self.send(Err(VoiceStreamError::processing(message)))
    }

    fn send(&self, delivery: Result<SampleFrame>) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|tx| tx.try_send(delivery).is_ok()),
            Err(_) => false,
        }
    }
}

/// Mock audio source for testing
#[derive(Debug)]
pub struct MockAudioSource {
    sample_rate: u32,
    script: Vec<MockFrame>,
    acquire_error: Option<String>,
    release_error: Option<String>,
    has_output: bool,
    output_open_error: Option<String>,
    output_close_error: Option<String>,
    output_write_error: Option<String>,
    stats: Arc<MockStats>,
    injector: MockInjector,
}

impl MockAudioSource {
    /// Create a new mock audio source at 44.1kHz with no scripted frames
    pub fn new() -> Self {
        Self::with_sample_rate(44100)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            script: Vec::new(),
            acquire_error: None,
            release_error: None,
            has_output: false,
            output_open_error: None,
            output_close_error: None,
            output_write_error: None,
            stats: Arc::new(MockStats::default()),
            injector: MockInjector {
                sender: Arc::new(Mutex::new(None)),
                sequence: Arc::new(AtomicU64::new(0)),
                sample_rate,
            },
        }
    }

    /// Frames delivered as soon as the source is acquired
    pub fn with_frames(mut self, frames: Vec<MockFrame>) -> Self {
        self.script = frames;
        self
    }

    /// Configure the mock to fail on acquire
    pub fn with_acquire_failure(mut self, message: &str) -> Self {
        self.acquire_error = Some(message.to_string());
        self
    }

    /// Configure the mock to fail on release
    pub fn with_release_failure(mut self, message: &str) -> Self {
        self.release_error = Some(message.to_string());
        self
    }

    /// Offer an output sink
    pub fn with_output(mut self) -> Self {
        self.has_output = true;
        self
    }

    pub fn with_output_open_failure(mut self, message: &str) -> Self {
        self.has_output = true;
        self.output_open_error = Some(message.to_string());
        self
    }

    pub fn with_output_close_failure(mut self, message: &str) -> Self {
        self.has_output = true;
        self.output_close_error = Some(message.to_string());
        self
    }

    pub fn with_output_write_failure(mut self, message: &str) -> Self {
        self.has_output = true;
        self.output_write_error = Some(message.to_string());
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    pub fn injector(&self) -> MockInjector {
        self.injector.clone()
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn acquire(
        &mut self,
        _request: &CaptureRequest,
        frames: FrameSender,
    ) -> Result<Box<dyn SourceHandle>> {
        if let Some(message) = &self.acquire_error {
            return Err(VoiceStreamError::acquisition(message.clone()));
        }

        match self.injector.sender.lock() {
            Ok(mut guard) => *guard = Some(frames),
            Err(e) => {
                return Err(VoiceStreamError::acquisition(format!(
                    "Mock injector poisoned: {}",
                    e
                )));
            }
        }

        for scripted in &self.script {
            let delivered = match scripted {
                MockFrame::Samples(samples) => self.injector.push(samples.clone()),
                MockFrame::Failure(message) => self.injector.push_failure(message),
            };
            if !delivered {
                if let Ok(mut guard) = self.injector.sender.lock() {
                    guard.take();
                }
                return Err(VoiceStreamError::acquisition(
                    "Scripted frames exceed the frame queue",
                ));
            }
        }

        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        self.stats.record("acquire");

        Ok(Box::new(MockHandle {
            sample_rate: self.sample_rate,
            sender: Arc::clone(&self.injector.sender),
            release_error: self.release_error.clone(),
            output: self.has_output.then(|| MockOutputSpec {
                open_error: self.output_open_error.clone(),
                close_error: self.output_close_error.clone(),
                write_error: self.output_write_error.clone(),
            }),
            stats: Arc::clone(&self.stats),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Debug, Clone)]
struct MockOutputSpec {
    open_error: Option<String>,
    close_error: Option<String>,
    write_error: Option<String>,
}

struct MockHandle {
    sample_rate: u32,
    sender: Arc<Mutex<Option<FrameSender>>>,
    release_error: Option<String>,
    output: Option<MockOutputSpec>,
    stats: Arc<MockStats>,
}

impl SourceHandle for MockHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_output(&mut self, _sample_rate: u32) -> Result<Option<Box<dyn OutputSink>>> {
        let Some(spec) = self.output.clone() else {
            return Ok(None);
        };
        if let Some(message) = spec.open_error {
            return Err(VoiceStreamError::acquisition(message));
        }

        self.stats.outputs_opened.fetch_add(1, Ordering::SeqCst);
        self.stats.record("open_output");
        Ok(Some(Box::new(MockOutput {
            close_error: spec.close_error,
            write_error: spec.write_error,
            stats: Arc::clone(&self.stats),
        })))
    }

    fn release(self: Box<Self>) -> Result<()> {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        self.stats.record("release");

        match self.release_error {
            Some(message) => Err(VoiceStreamError::release("mock source", message)),
            None => Ok(()),
        }
    }
}

struct MockOutput {
    close_error: Option<String>,
    write_error: Option<String>,
    stats: Arc<MockStats>,
}

impl OutputSink for MockOutput {
    fn write(&mut self, pcm: &[i16]) -> Result<()> {
        if let Some(message) = &self.write_error {
            return Err(VoiceStreamError::processing(message.clone()));
        }
        self.stats.samples_written.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.stats.outputs_closed.fetch_add(1, Ordering::SeqCst);
        self.stats.record("close_output");

        match self.close_error {
            Some(message) => Err(VoiceStreamError::release("mock output", message)),
            None => Ok(()),
        }
    }
}
