//! Session event delivery.
//!
//! A [`CaptureSession`](crate::session::CaptureSession) reports everything it
//! does through a [`SessionEvents`] implementation owned by the session.

use crate::audio::encode::EncodedChunk;
use crate::error::{ErrorKind, VoiceStreamError};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Pluggable receiver for session lifecycle and data events.
///
/// Callbacks run synchronously on the thread driving the session and must
/// not block for long; chunk emission is on the frame path.
pub trait SessionEvents: Send {
    /// The session became active.
    fn on_start(&mut self) {}

    /// The session released its resources and is idle again.
    fn on_stop(&mut self) {}

    /// One frame was resampled and encoded.
    fn on_chunk(&mut self, chunk: EncodedChunk);

    /// A non-fatal failure, or the failure that aborted a start.
    fn on_error(&mut self, _error: &VoiceStreamError) {}

    /// Silence lasted longer than the configured duration.
    fn on_silence(&mut self) {}

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "events"
    }
}

/// An event as recorded or forwarded by the provided implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    Stopped,
    Chunk(EncodedChunk),
    Error { kind: ErrorKind, message: String },
    Silence,
}

impl SessionEvent {
    fn error(error: &VoiceStreamError) -> Self {
        Self::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Short lowercase name, as used in JSON output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started => "start",
            Self::Stopped => "stop",
            Self::Chunk(_) => "chunk",
            Self::Error { .. } => "error",
            Self::Silence => "silence",
        }
    }
}

/// Records every event in order.
///
/// Clones share the same log, so a test can keep one while the session owns
/// another and still inspect events after the session is dropped.
#[derive(Debug, Clone, Default)]
pub struct CollectorEvents {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl CollectorEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Event labels in order, e.g. `["start", "chunk", "stop"]`.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events().iter().map(SessionEvent::label).collect()
    }

    pub fn chunks(&self) -> Vec<EncodedChunk> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Error { kind, message } => Some((kind, message)),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded events with the given label.
    pub fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|&&l| l == label).count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&mut self, event: SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl SessionEvents for CollectorEvents {
    fn on_start(&mut self) {
        self.push(SessionEvent::Started);
    }

    fn on_stop(&mut self) {
        self.push(SessionEvent::Stopped);
    }

    fn on_chunk(&mut self, chunk: EncodedChunk) {
        self.push(SessionEvent::Chunk(chunk));
    }

    fn on_error(&mut self, error: &VoiceStreamError) {
        self.push(SessionEvent::error(error));
    }

    fn on_silence(&mut self) {
        self.push(SessionEvent::Silence);
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Forwards events to another thread over a crossbeam channel.
///
/// Sends never block: when the channel is full or the receiver is gone the
/// event is dropped and counted.
pub struct ChannelEvents {
    tx: crossbeam_channel::Sender<SessionEvent>,
    dropped: u64,
}

impl ChannelEvents {
    pub fn new(tx: crossbeam_channel::Sender<SessionEvent>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Creates a bounded channel and returns the events plus its receiver.
    pub fn bounded(capacity: usize) -> (Self, crossbeam_channel::Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn forward(&mut self, event: SessionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped += 1;
            tracing::debug!(event = e.into_inner().label(), "Session event dropped");
        }
    }
}

impl SessionEvents for ChannelEvents {
    fn on_start(&mut self) {
        self.forward(SessionEvent::Started);
    }

    fn on_stop(&mut self) {
        self.forward(SessionEvent::Stopped);
    }

    fn on_chunk(&mut self, chunk: EncodedChunk) {
        self.forward(SessionEvent::Chunk(chunk));
    }

    fn on_error(&mut self, error: &VoiceStreamError) {
        self.forward(SessionEvent::error(error));
    }

    fn on_silence(&mut self) {
        self.forward(SessionEvent::Silence);
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Line format used by [`ChunkWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkFormat {
    /// Bare base64, one chunk per line. Other events go to the log only.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum JsonLine<'a> {
    Start,
    Stop,
    Chunk(&'a EncodedChunk),
    Error { kind: ErrorKind, message: String },
    Silence,
}

/// Writes chunks line by line, e.g. to stdout for piping into another tool.
pub struct ChunkWriter<W: Write + Send> {
    out: W,
    format: ChunkFormat,
    written: u64,
    write_errors: u64,
}

impl<W: Write + Send> ChunkWriter<W> {
    pub fn new(out: W, format: ChunkFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
            write_errors: 0,
        }
    }

    /// Chunks written successfully.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) -> bool {
        let result = writeln!(self.out, "{}", line).and_then(|()| self.out.flush());
        match result {
            Ok(()) => true,
            Err(e) => {
                self.write_errors += 1;
                tracing::warn!("Failed to write output line: {}", e);
                false
            }
        }
    }

    fn write_json(&mut self, line: &JsonLine<'_>) -> bool {
        match serde_json::to_string(line) {
            Ok(json) => self.write_line(&json),
            Err(e) => {
                self.write_errors += 1;
                tracing::warn!("Failed to serialize event: {}", e);
                false
            }
        }
    }
}

impl<W: Write + Send> SessionEvents for ChunkWriter<W> {
    fn on_start(&mut self) {
        if self.format == ChunkFormat::Json {
            self.write_json(&JsonLine::Start);
        }
    }

    fn on_stop(&mut self) {
        if self.format == ChunkFormat::Json {
            self.write_json(&JsonLine::Stop);
        }
    }

    fn on_chunk(&mut self, chunk: EncodedChunk) {
        let ok = match self.format {
            ChunkFormat::Plain => self.write_line(chunk.as_str()),
            ChunkFormat::Json => self.write_json(&JsonLine::Chunk(&chunk)),
        };
        if ok {
            self.written += 1;
        }
    }

    fn on_error(&mut self, error: &VoiceStreamError) {
        match self.format {
            ChunkFormat::Plain => tracing::error!("{}", error),
            ChunkFormat::Json => {
                self.write_json(&JsonLine::Error {
                    kind: error.kind(),
                    message: error.to_string(),
                });
            }
        }
    }

    fn on_silence(&mut self) {
        match self.format {
            ChunkFormat::Plain => tracing::info!("Silence detected"),
            ChunkFormat::Json => {
                self.write_json(&JsonLine::Silence);
            }
        }
    }

    fn name(&self) -> &'static str {
        "writer"
    }
}
