//! WAV file audio source.
//!
//! Streams a decoded WAV file through the session as if it came from a
//! device: fixed-size frames at the file's own sample rate, delivered from a
//! reader thread, optionally paced to real time.

use crate::audio::frame::SampleFrame;
use crate::audio::source::{AudioSource, CaptureRequest, FrameSender, SourceHandle};
use crate::error::{Result, VoiceStreamError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Audio source that replays WAV file data.
///
/// Integer and float files of any bit depth are accepted. Only the first
/// channel is used.
#[derive(Debug, Clone)]
pub struct WavFileSource {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    realtime: bool,
}

impl WavFileSource {
    /// Opens and decodes the file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            VoiceStreamError::acquisition(format!(
                "Failed to open WAV file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| {
            VoiceStreamError::acquisition(format!("Failed to parse WAV file: {}", e))
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(VoiceStreamError::acquisition(
                "WAV file declares zero channels",
            ));
        }
        let channels = spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| VoiceStreamError::acquisition(format!("Failed to read WAV samples: {}", e)))?;

        let samples = interleaved.into_iter().step_by(channels).collect();

        Ok(Self {
            samples: Arc::new(samples),
            sample_rate: spec.sample_rate,
            realtime: false,
        })
    }

    /// Wraps already decoded mono samples.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            realtime: false,
        }
    }

    /// Deliver frames no faster than their playback duration.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Playback length of the file.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl AudioSource for WavFileSource {
    fn acquire(
        &mut self,
        request: &CaptureRequest,
        frames: FrameSender,
    ) -> Result<Box<dyn SourceHandle>> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let samples = Arc::clone(&self.samples);
        let sample_rate = self.sample_rate;
        let frame_size = request.buffer_size.max(1);
        let realtime = self.realtime;

        let reader = std::thread::Builder::new()
            .name("wav-reader".to_string())
            .spawn(move || {
                stream_frames(&samples, sample_rate, frame_size, realtime, &frames, &stop_rx)
            })
            .map_err(|e| {
                VoiceStreamError::acquisition(format!("Failed to spawn WAV reader: {}", e))
            })?;

        tracing::debug!(
            sample_rate,
            frame_size,
            realtime,
            samples = self.samples.len(),
            "WAV reader started"
        );

        Ok(Box::new(WavHandle {
            sample_rate,
            stop: Some(stop_tx),
            reader: Some(reader),
        }))
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

/// Sends frames until the file is exhausted or the handle is released.
///
/// Dropping the stop sender disconnects `stop`, which wakes every wait below.
fn stream_frames(
    samples: &[f32],
    sample_rate: u32,
    frame_size: usize,
    realtime: bool,
    frames: &FrameSender,
    stop: &Receiver<()>,
) {
    for (sequence, chunk) in samples.chunks(frame_size).enumerate() {
        let frame = SampleFrame::new(chunk.to_vec(), sample_rate, sequence as u64);
        let period = Duration::from_millis(frame.duration_ms());

        select! {
            send(frames, Ok(frame)) -> sent => {
                if sent.is_err() {
                    return;
                }
            }
            recv(stop) -> _ => return,
        }

        if realtime {
            match stop.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }
}

struct WavHandle {
    sample_rate: u32,
    stop: Option<Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SourceHandle for WavHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn release(mut self: Box<Self>) -> Result<()> {
        drop(self.stop.take());

        match self.reader.take() {
            Some(reader) => reader
                .join()
                .map_err(|_| VoiceStreamError::release("wav reader", "Reader thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for WavHandle {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("WAV reader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;
    use std::io::Cursor;
    use std::time::Instant;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn request(buffer_size: usize) -> CaptureRequest {
        CaptureRequest {
            buffer_size,
            target_sample_rate: 16000,
        }
    }

    #[test]
    fn test_from_reader_normalizes_i16() {
        let wav_data = make_wav_data(16000, 1, &[0, 16384, -32768]);

        let source = WavFileSource::from_reader(Cursor::new(wav_data)).unwrap();

        assert_eq!(source.sample_rate(), 16000);
        assert_eq!(source.samples(), &[0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_from_reader_stereo_takes_first_channel() {
        // Stereo pairs: (100, 200), (300, 400), (500, 600)
        let stereo = [100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(44100, 2, &stereo);

        let source = WavFileSource::from_reader(Cursor::new(wav_data)).unwrap();

        let expected: Vec<f32> = [100i16, 300, 500]
            .iter()
            .map(|&s| s as f32 / 32768.0)
            .collect();
        assert_eq!(source.samples(), expected.as_slice());
    }

    #[test]
    fn test_from_reader_float_format() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.25f32, -0.75] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let source = WavFileSource::from_reader(Cursor::new(cursor.into_inner())).unwrap();

        assert_eq!(source.sample_rate(), 48000);
        assert_eq!(source.samples(), &[0.25, -0.75]);
    }

    #[test]
    fn test_invalid_wav_data_returns_error() {
        let result = WavFileSource::from_reader(Cursor::new(vec![0u8, 1, 2, 3, 4, 5]));

        match result {
            Err(VoiceStreamError::AcquisitionFailure { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AcquisitionFailure"),
        }
    }

    #[test]
    fn test_malformed_wav_random_garbage() {
        let garbage: Vec<u8> = (0..500).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        assert!(WavFileSource::from_reader(Cursor::new(garbage)).is_err());
    }

    #[test]
    fn test_open_missing_file_is_acquisition_failure() {
        let result = WavFileSource::open(Path::new("/nonexistent/voicestream/input.wav"));
        assert!(matches!(
            result,
            Err(VoiceStreamError::AcquisitionFailure { .. })
        ));
    }

    #[test]
    fn test_open_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, make_wav_data(8000, 1, &[1000i16; 800])).unwrap();

        let source = WavFileSource::open(&path).unwrap();

        assert_eq!(source.samples().len(), 800);
        assert_eq!(source.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_acquire_streams_fixed_size_frames() {
        let wav_data = make_wav_data(16000, 1, &[1i16; 5000]);
        let mut source = WavFileSource::from_reader(Cursor::new(wav_data)).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(defaults::FRAME_QUEUE_DEPTH);

        let handle = source.acquire(&request(1600), tx).unwrap();
        assert_eq!(handle.sample_rate(), 16000);

        let frames: Vec<SampleFrame> = rx.iter().map(|f| f.unwrap()).collect();
        let sizes: Vec<usize> = frames.iter().map(SampleFrame::len).collect();
        assert_eq!(sizes, vec![1600, 1600, 1600, 200]);
        assert_eq!(frames[3].sequence, 3);
        assert!(frames.iter().all(|f| f.sample_rate == 16000));

        handle.release().unwrap();
    }

    #[test]
    fn test_acquire_empty_file_disconnects_immediately() {
        let mut source = WavFileSource::from_samples(Vec::new(), 16000);
        let (tx, rx) = crossbeam_channel::bounded(defaults::FRAME_QUEUE_DEPTH);

        let handle = source.acquire(&request(1024), tx).unwrap();

        assert!(rx.recv().is_err());
        handle.release().unwrap();
    }

    #[test]
    fn test_release_stops_blocked_reader() {
        // More frames than the queue holds, so the reader blocks on send.
        let mut source = WavFileSource::from_samples(vec![0.0; 100 * 64], 16000);
        let (tx, rx) = crossbeam_channel::bounded(4);

        let handle = source.acquire(&request(64), tx).unwrap();
        assert!(rx.recv().is_ok());

        handle.release().unwrap();
        let remaining = rx.try_iter().count();
        assert!(remaining <= 4);
    }

    #[test]
    fn test_release_interrupts_realtime_pacing() {
        // Ten seconds of audio in one-second frames.
        let mut source = WavFileSource::from_samples(vec![0.0; 160_000], 16000).with_realtime(true);
        let (tx, rx) = crossbeam_channel::bounded(defaults::FRAME_QUEUE_DEPTH);

        let handle = source.acquire(&request(16000), tx).unwrap();
        assert!(rx.recv().is_ok());

        let started = Instant::now();
        handle.release().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_source_can_be_acquired_again() {
        let mut source = WavFileSource::from_samples(vec![0.1; 10], 8000);

        for _ in 0..2 {
            let (tx, rx) = crossbeam_channel::bounded(defaults::FRAME_QUEUE_DEPTH);
            let handle = source.acquire(&request(10), tx).unwrap();
            let frame = rx.recv().unwrap().unwrap();
            assert_eq!(frame.sequence, 0);
            assert_eq!(frame.len(), 10);
            handle.release().unwrap();
        }
    }
}
