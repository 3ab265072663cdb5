//! Silence detection over wall-clock time.
//!
//! Each frame is reduced to an RMS level in dBFS. A run of frames below the
//! threshold that lasts at least the configured duration is reported once.
//! Duration is measured with a [`Clock`], not by counting samples, so the
//! detector does not care about frame sizes or sample rates.

use crate::audio::clock::{Clock, SystemClock};
use crate::defaults;
use std::time::{Duration, Instant};

/// Configuration for the silence detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceDetectorConfig {
    /// Level in dBFS below which a frame counts as silent.
    pub threshold_db: f64,
    /// Continuous silence required before the detector fires.
    pub duration: Duration,
}

impl Default for SilenceDetectorConfig {
    fn default() -> Self {
        Self {
            threshold_db: defaults::SILENCE_THRESHOLD_DB,
            duration: Duration::from_millis(defaults::SILENCE_DURATION_MS),
        }
    }
}

type SilenceCallback = Box<dyn FnMut() + Send>;

/// RMS-threshold-over-time silence classifier.
pub struct SilenceDetector<C: Clock = SystemClock> {
    config: SilenceDetectorConfig,
    silence_start: Option<Instant>,
    fired: bool,
    on_silence: Option<SilenceCallback>,
    clock: C,
}

impl<C: Clock> SilenceDetector<C> {
    /// Creates a detector that reads time from `clock`.
    pub fn with_clock(config: SilenceDetectorConfig, clock: C) -> Self {
        Self {
            config,
            silence_start: None,
            fired: false,
            on_silence: None,
            clock,
        }
    }

    /// Registers a callback invoked when silence is confirmed.
    pub fn with_callback(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_silence = Some(Box::new(callback));
        self
    }

    /// Processes a frame at the clock's current time.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let now = self.clock.now();
        self.process_at(samples, now)
    }

    /// Processes a frame observed at `now`.
    ///
    /// Returns true exactly once per silence run: on the first frame at or
    /// after `duration` of continuous silence. The run is not cleared when the
    /// detector fires; a frame at or above the threshold, or [`reset`], starts
    /// a new one.
    ///
    /// Empty frames carry no level and, like NaN levels, end the run.
    ///
    /// [`reset`]: SilenceDetector::reset
    pub fn process_at(&mut self, samples: &[f32], now: Instant) -> bool {
        let silent = level_db(samples)
            .is_some_and(|level| is_below(level, self.config.threshold_db));
        if !silent {
            self.silence_start = None;
            self.fired = false;
            return false;
        }

        let Some(start) = self.silence_start else {
            self.silence_start = Some(now);
            return false;
        };

        if self.fired || now.saturating_duration_since(start) < self.config.duration {
            return false;
        }

        self.fired = true;
        if let Some(callback) = self.on_silence.as_mut() {
            callback();
        }
        true
    }

    /// Clears the current silence run. Idempotent.
    pub fn reset(&mut self) {
        self.silence_start = None;
        self.fired = false;
    }

    /// Returns true while a silence run is in progress.
    pub fn is_silent(&self) -> bool {
        self.silence_start.is_some()
    }

    /// How long the current silence run has lasted.
    pub fn silence_elapsed(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.silence_start
            .map(|start| now.saturating_duration_since(start))
    }

    pub fn config(&self) -> &SilenceDetectorConfig {
        &self.config
    }
}

impl SilenceDetector<SystemClock> {
    /// Creates a detector using the system clock.
    pub fn new(config: SilenceDetectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

/// Root mean square of normalized samples. Zero for an empty frame.
pub fn calculate_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = sample as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt()
}

/// Frame level in dBFS, or `None` for an empty frame.
///
/// Digital silence yields negative infinity.
pub fn level_db(samples: &[f32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(20.0 * calculate_rms(samples).log10())
}

// -inf is below every finite threshold; NaN is never silent.
fn is_below(level: f64, threshold: f64) -> bool {
    !level.is_nan() && level < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clock::ManualClock;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_silence(count: usize) -> Vec<f32> {
        vec![0.0f32; count]
    }

    fn make_tone(count: usize, amplitude: f32) -> Vec<f32> {
        vec![amplitude; count]
    }

    fn detector(duration_ms: u64) -> (SilenceDetector<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = SilenceDetectorConfig {
            threshold_db: -50.0,
            duration: Duration::from_millis(duration_ms),
        };
        (SilenceDetector::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&make_silence(1000)), 0.0);
    }

    #[test]
    fn test_rms_full_scale() {
        assert_relative_eq!(calculate_rms(&make_tone(1000, 1.0)), 1.0);
        assert_relative_eq!(calculate_rms(&make_tone(1000, -1.0)), 1.0);
    }

    #[test]
    fn test_level_db_values() {
        assert_relative_eq!(level_db(&make_tone(100, 1.0)).unwrap(), 0.0);
        assert_relative_eq!(
            level_db(&make_tone(100, 0.1)).unwrap(),
            -20.0,
            epsilon = 1e-5
        );
        assert_eq!(level_db(&make_silence(100)), Some(f64::NEG_INFINITY));
        assert_eq!(level_db(&[]), None);
    }

    #[test]
    fn test_negative_infinity_is_below_threshold() {
        assert!(is_below(f64::NEG_INFINITY, -50.0));
        assert!(is_below(f64::NEG_INFINITY, -1000.0));
        assert!(!is_below(f64::NAN, -50.0));
        assert!(!is_below(-50.0, -50.0));
    }

    #[test]
    fn test_silence_below_duration_never_fires() {
        let (mut detector, clock) = detector(1000);

        for _ in 0..10 {
            assert!(!detector.process(&make_silence(160)));
            clock.advance(Duration::from_millis(99));
        }
        // 10 frames, 891ms between first and last
        assert!(detector.is_silent());
    }

    #[test]
    fn test_silence_fires_once_at_boundary() {
        let (mut detector, clock) = detector(1000);

        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(999));
        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(1));
        assert!(detector.process(&make_silence(160)));

        clock.advance(Duration::from_millis(500));
        assert!(!detector.process(&make_silence(160)));
        assert!(detector.is_silent());
    }

    #[test]
    fn test_sound_interrupts_silence_run() {
        let (mut detector, clock) = detector(1000);

        detector.process(&make_silence(160));
        clock.advance(Duration::from_millis(800));
        assert!(!detector.process(&make_tone(160, 0.5)));
        assert!(!detector.is_silent());

        // New run starts here
        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(800));
        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(200));
        assert!(detector.process(&make_silence(160)));
    }

    #[test]
    fn test_fires_again_after_sound() {
        let (mut detector, clock) = detector(100);

        detector.process(&make_silence(16));
        clock.advance(Duration::from_millis(100));
        assert!(detector.process(&make_silence(16)));

        detector.process(&make_tone(16, 0.8));
        detector.process(&make_silence(16));
        clock.advance(Duration::from_millis(100));
        assert!(detector.process(&make_silence(16)));
    }

    #[test]
    fn test_level_just_above_threshold_is_not_silence() {
        let (mut detector, clock) = detector(0);
        // RMS 10^(-50/20) = 0.0031623 is the -50 dB threshold; nudge just above it
        let quiet = make_tone(100, 10f32.powf(-2.5) * 1.001);

        detector.process(&quiet);
        clock.advance(Duration::from_millis(10));
        assert!(!detector.process(&quiet));
        assert!(!detector.is_silent());
    }

    #[test]
    fn test_quiet_noise_below_threshold_counts_as_silence() {
        let (mut detector, clock) = detector(500);
        let hiss = make_tone(256, 0.001); // -60 dBFS

        detector.process(&hiss);
        clock.advance(Duration::from_millis(500));
        assert!(detector.process(&hiss));
    }

    #[test]
    fn test_reset_discards_run() {
        let (mut detector, clock) = detector(1000);

        detector.process(&make_silence(160));
        clock.advance(Duration::from_millis(900));
        detector.reset();
        assert!(!detector.is_silent());

        // Behaves like a fresh detector: first frame only starts the run
        clock.advance(Duration::from_millis(200));
        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(999));
        assert!(!detector.process(&make_silence(160)));
        clock.advance(Duration::from_millis(1));
        assert!(detector.process(&make_silence(160)));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut detector, _clock) = detector(1000);
        detector.reset();
        detector.reset();
        assert!(!detector.is_silent());
        assert_eq!(detector.silence_elapsed(), None);
    }

    #[test]
    fn test_empty_frame_ends_silence_run() {
        let (mut detector, clock) = detector(100);

        detector.process(&make_silence(16));
        clock.advance(Duration::from_millis(50));
        assert!(!detector.process(&[]));
        assert!(!detector.is_silent());

        clock.advance(Duration::from_millis(50));
        assert!(!detector.process(&make_silence(16)));
        assert!(detector.is_silent());
    }

    #[test]
    fn test_nan_frame_resets_run() {
        let (mut detector, clock) = detector(100);

        detector.process(&make_silence(16));
        clock.advance(Duration::from_millis(100));
        assert!(!detector.process(&[f32::NAN; 16]));
        assert!(!detector.is_silent());
    }

    #[test]
    fn test_callback_invoked_on_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let clock = ManualClock::new();
        let config = SilenceDetectorConfig {
            threshold_db: -40.0,
            duration: Duration::from_millis(300),
        };
        let mut detector = SilenceDetector::with_clock(config, clock.clone())
            .with_callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        detector.process(&make_silence(64));
        clock.advance(Duration::from_millis(300));
        detector.process(&make_silence(64));
        clock.advance(Duration::from_millis(300));
        detector.process(&make_silence(64));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_silence_elapsed_tracks_run() {
        let (mut detector, clock) = detector(1000);
        assert_eq!(detector.silence_elapsed(), None);

        detector.process(&make_silence(16));
        clock.advance(Duration::from_millis(420));
        assert_eq!(
            detector.silence_elapsed(),
            Some(Duration::from_millis(420))
        );
    }

    #[test]
    fn test_process_at_uses_given_timestamp() {
        let mut detector = SilenceDetector::new(SilenceDetectorConfig {
            threshold_db: -50.0,
            duration: Duration::from_secs(1),
        });
        let t0 = Instant::now();

        assert!(!detector.process_at(&make_silence(16), t0));
        assert!(!detector.process_at(&make_silence(16), t0 + Duration::from_millis(500)));
        assert!(detector.process_at(&make_silence(16), t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_default_config() {
        let config = SilenceDetectorConfig::default();
        assert_eq!(config.threshold_db, -50.0);
        assert_eq!(config.duration, Duration::from_millis(1000));
    }
}
