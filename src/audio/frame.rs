//! Frames of captured audio.

use crate::error::{Result, VoiceStreamError};

/// One callback's worth of mono audio at the source sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    /// Normalized samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Sequence number assigned by the source, starting at zero.
    pub sequence: u64,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Builds a frame from 16-bit PCM, normalizing to [-1.0, 1.0).
    pub fn from_i16(samples: &[i16], sample_rate: u32, sequence: u64) -> Self {
        Self::new(
            samples.iter().map(|&s| s as f32 / 32768.0).collect(),
            sample_rate,
            sequence,
        )
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in milliseconds, zero when the rate is unknown.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Checks the frame can go through the pipeline.
    ///
    /// The source rate must be non-zero and every sample finite.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VoiceStreamError::processing(format!(
                "Frame {} has a zero sample rate",
                self.sequence
            )));
        }

        if let Some(index) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(VoiceStreamError::processing(format!(
                "Frame {} has a non-finite sample at index {}",
                self.sequence, index
            )));
        }

        Ok(())
    }
}

/// Re-blocks arbitrarily sized callback buffers into fixed-size frames.
///
/// Audio callbacks hand over whatever the driver chose; sources push those
/// buffers through here to deliver frames of the configured buffer size.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            next_sequence: 0,
        }
    }

    /// Appends samples and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<SampleFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let wanted = self.frame_size - self.pending.len();
            let take = wanted.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let samples = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                );
                frames.push(self.emit(samples));
            }
        }

        frames
    }

    /// Emits any buffered partial frame.
    pub fn flush(&mut self) -> Option<SampleFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        Some(self.emit(samples))
    }

    fn emit(&mut self, samples: Vec<f32>) -> SampleFrame {
        let frame = SampleFrame::new(samples, self.sample_rate, self.next_sequence);
        self.next_sequence += 1;
        frame
    }
}
