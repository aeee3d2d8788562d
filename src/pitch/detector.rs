//! # Autocorrelation Pitch Detector
//!
//! Estimates the fundamental frequency of one [`SampleFrame`] by searching
//! for the lag at which the signal best matches a shifted copy of itself.
//!
//! ## Algorithm:
//! 1. **DC removal**: subtract the frame mean from every sample
//! 2. **Silence gate**: if the summed squared samples fall below
//!    [`SILENCE_ENERGY_THRESHOLD`], report [`PitchEstimate::SILENCE`]
//! 3. **Lag search**: for every lag in `min_lag..=max_lag` compute
//!    `sum(frame[i] * frame[i + lag])` and keep the strictly largest;
//!    equal sums keep the earlier (shorter) lag
//! 4. **Conversion**: `sample_rate / best_lag`
//!
//! ## Concurrency:
//! [`PitchDetector`] only holds its immutable [`DetectorConfig`]. `detect`
//! takes the frame by value and de-means that owned buffer, so one detector
//! can be shared by every connection without any locking.

use super::frame::SampleFrame;
use std::fmt;

/// Frames whose post-DC energy is below this are reported as silence.
pub const SILENCE_ENERGY_THRESHOLD: f32 = 0.001;

/// Reasons a `(sample_rate, min_freq, max_freq)` triple cannot drive detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorConfigError {
    /// Sample rate of zero
    InvalidSampleRate(u32),

    /// A frequency bound that is zero, negative, NaN or infinite
    InvalidFrequency { name: &'static str, value: f32 },

    /// `max_freq` does not exceed `min_freq`
    InvertedRange { min_freq: f32, max_freq: f32 },

    /// `sample_rate / max_freq` truncates to zero, so no lag can be searched
    DegenerateLag { sample_rate: u32, max_freq: f32 },
}

impl fmt::Display for DetectorConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorConfigError::InvalidSampleRate(rate) => {
                write!(f, "sample rate must be positive, got {}", rate)
            }
            DetectorConfigError::InvalidFrequency { name, value } => {
                write!(f, "{} must be a positive finite frequency, got {}", name, value)
            }
            DetectorConfigError::InvertedRange { min_freq, max_freq } => write!(
                f,
                "max_freq ({} Hz) must exceed min_freq ({} Hz)",
                max_freq, min_freq
            ),
            DetectorConfigError::DegenerateLag {
                sample_rate,
                max_freq,
            } => write!(
                f,
                "max_freq ({} Hz) is above the sample rate ({} Hz); minimum lag would be 0",
                max_freq, sample_rate
            ),
        }
    }
}

impl std::error::Error for DetectorConfigError {}

/// Immutable detector settings, derived once at startup.
///
/// Lag bounds are integer-truncated, so the searchable range is slightly
/// narrower than the nominal `[min_freq, max_freq]`:
/// 44100 Hz with 80..400 Hz gives lags 110..=551, i.e. ~80.04..~400.9 Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    sample_rate: u32,
    min_lag: usize,
    max_lag: usize,
}

impl DetectorConfig {
    pub fn new(
        sample_rate: u32,
        min_freq: f32,
        max_freq: f32,
    ) -> Result<Self, DetectorConfigError> {
        if sample_rate == 0 {
            return Err(DetectorConfigError::InvalidSampleRate(sample_rate));
        }
        for (name, value) in [("min_freq", min_freq), ("max_freq", max_freq)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DetectorConfigError::InvalidFrequency { name, value });
            }
        }
        if max_freq <= min_freq {
            return Err(DetectorConfigError::InvertedRange { min_freq, max_freq });
        }

        let rate = sample_rate as f32;
        let min_lag = (rate / max_freq) as usize;
        let max_lag = (rate / min_freq) as usize;

        if min_lag == 0 {
            return Err(DetectorConfigError::DegenerateLag {
                sample_rate,
                max_freq,
            });
        }

        Ok(Self {
            sample_rate,
            min_lag,
            max_lag,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn min_lag(&self) -> usize {
        self.min_lag
    }

    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    /// Lowest frequency the lag search can report (`sample_rate / max_lag`).
    pub fn lowest_detectable_hz(&self) -> f32 {
        self.sample_rate as f32 / self.max_lag as f32
    }

    /// Highest frequency the lag search can report (`sample_rate / min_lag`).
    pub fn highest_detectable_hz(&self) -> f32 {
        self.sample_rate as f32 / self.min_lag as f32
    }
}

/// A frequency in Hz, or `0` for silence / no periodicity in range.
///
/// Displays with exactly one decimal place, which is the reply format on
/// the stream (`"215.3"`, `"0.0"`).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PitchEstimate(f32);

impl PitchEstimate {
    pub const SILENCE: PitchEstimate = PitchEstimate(0.0);

    pub fn hz(&self) -> f32 {
        self.0
    }

    pub fn is_silence(&self) -> bool {
        self.hz() == 0.0
    }
}

impl fmt::Display for PitchEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// Shared, stateless autocorrelation detector.
#[derive(Debug, Clone)]
pub struct PitchDetector {
    config: DetectorConfig,
}

impl PitchDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Estimate the pitch of `frame`.
    ///
    /// The frame is consumed: its samples are de-meaned in place, and the
    /// caller never sees the modified buffer. An empty frame is treated as
    /// silence rather than dividing by zero.
    pub fn detect(&self, mut frame: SampleFrame) -> PitchEstimate {
        if frame.is_empty() {
            return PitchEstimate::SILENCE;
        }

        remove_dc_offset(frame.samples_mut());
        let samples = frame.samples();

        if energy(samples) < SILENCE_ENERGY_THRESHOLD {
            return PitchEstimate::SILENCE;
        }

        match best_lag(samples, self.config.min_lag, self.config.max_lag) {
            Some(lag) => PitchEstimate(self.config.sample_rate as f32 / lag as f32),
            None => PitchEstimate::SILENCE,
        }
    }
}

fn remove_dc_offset(samples: &mut [f32]) {
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }
}

fn energy(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s * s).sum()
}

/// Lag with the strictly greatest positive correlation, earliest on ties.
///
/// Returns `None` when no lag correlates above zero.
fn best_lag(samples: &[f32], min_lag: usize, max_lag: usize) -> Option<usize> {
    let mut max_correlation = 0.0f32;
    let mut best = None;

    for lag in min_lag..=max_lag {
        let correlation: f32 = samples
            .iter()
            .zip(samples.iter().skip(lag))
            .map(|(a, b)| a * b)
            .sum();

        if correlation > max_correlation {
            max_correlation = correlation;
            best = Some(lag);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 44100;

    fn default_detector() -> PitchDetector {
        PitchDetector::new(DetectorConfig::new(SAMPLE_RATE, 80.0, 400.0).unwrap())
    }

    fn sine(freq: f32, amplitude: f32, offset: f32, len: usize) -> SampleFrame {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin() + offset)
            .collect::<Vec<f32>>()
            .into()
    }

    #[test]
    fn test_default_lag_bounds_are_truncated() {
        let config = DetectorConfig::new(SAMPLE_RATE, 80.0, 400.0).unwrap();
        assert_eq!(config.min_lag(), 110);
        assert_eq!(config.max_lag(), 551);
        assert!(config.lowest_detectable_hz() > 80.0);
        assert!(config.highest_detectable_hz() > 400.0);
    }

    #[test]
    fn test_rejects_invalid_configs() {
        assert_eq!(
            DetectorConfig::new(0, 80.0, 400.0),
            Err(DetectorConfigError::InvalidSampleRate(0))
        );
        assert!(matches!(
            DetectorConfig::new(SAMPLE_RATE, 0.0, 400.0),
            Err(DetectorConfigError::InvalidFrequency { name: "min_freq", .. })
        ));
        assert!(matches!(
            DetectorConfig::new(SAMPLE_RATE, 80.0, f32::NAN),
            Err(DetectorConfigError::InvalidFrequency { name: "max_freq", .. })
        ));
        assert!(matches!(
            DetectorConfig::new(SAMPLE_RATE, -80.0, 400.0),
            Err(DetectorConfigError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            DetectorConfig::new(SAMPLE_RATE, 400.0, 80.0),
            Err(DetectorConfigError::InvertedRange { .. })
        ));
        assert!(matches!(
            DetectorConfig::new(SAMPLE_RATE, 200.0, 200.0),
            Err(DetectorConfigError::InvertedRange { .. })
        ));
        assert!(matches!(
            DetectorConfig::new(8000, 100.0, 9000.0),
            Err(DetectorConfigError::DegenerateLag { .. })
        ));
    }

    #[test]
    fn test_sine_within_one_lag_step() {
        let detector = default_detector();

        for freq in [150.0f32, 220.0, 261.63, 300.0, 330.0, 392.0] {
            let estimate = detector.detect(sine(freq, 0.5, 0.0, 2048));
            assert!(!estimate.is_silence(), "{} Hz reported as silence", freq);

            let expected_lag = (SAMPLE_RATE as f32 / freq).round();
            let found_lag = SAMPLE_RATE as f32 / estimate.hz();
            assert!(
                (found_lag - expected_lag).abs() <= 1.0 + 1e-3,
                "{} Hz: expected lag ~{}, found {}",
                freq,
                expected_lag,
                found_lag
            );
        }
    }

    #[test]
    fn test_220hz_reference_frame() {
        let estimate = default_detector().detect(sine(220.0, 0.5, 0.0, 2048));
        assert!((estimate.hz() - 220.5).abs() < 1e-3);
        assert_eq!(estimate.to_string(), "220.5");
    }

    #[test]
    fn test_silence_gate() {
        let detector = default_detector();
        assert_eq!(detector.detect(vec![0.0; 2048].into()), PitchEstimate::SILENCE);
        // Energy ~0.0001: periodic, but below the gate
        assert_eq!(detector.detect(sine(220.0, 0.0003, 0.0, 2048)), PitchEstimate::SILENCE);
        // A constant is all DC and vanishes entirely
        assert_eq!(detector.detect(vec![0.8; 2048].into()), PitchEstimate::SILENCE);
    }

    #[test]
    fn test_empty_frame_is_silence() {
        assert_eq!(default_detector().detect(SampleFrame::default()), PitchEstimate::SILENCE);
    }

    #[test]
    fn test_dc_offset_does_not_move_estimate() {
        let detector = default_detector();
        for (freq, offset) in [(220.0f32, 0.3f32), (150.0, -0.2)] {
            let clean = detector.detect(sine(freq, 0.5, 0.0, 2048));
            let shifted = detector.detect(sine(freq, 0.5, offset, 2048));
            assert_eq!(clean, shifted, "{} Hz with offset {}", freq, offset);
        }
    }

    #[test]
    fn test_equal_correlations_prefer_smaller_lag() {
        // Lags 2..=3; both lags correlate to exactly 1.0
        let detector = PitchDetector::new(DetectorConfig::new(12, 4.0, 6.0).unwrap());
        assert_eq!(detector.config().min_lag(), 2);
        assert_eq!(detector.config().max_lag(), 3);

        let frame = SampleFrame::new(vec![-1.0, -2.0, 2.0, -1.0, 1.0, 1.0]);
        assert_eq!(detector.detect(frame).hz(), 6.0);
    }

    #[test]
    fn test_no_positive_correlation_is_silence() {
        let detector = PitchDetector::new(DetectorConfig::new(12, 4.0, 6.0).unwrap());
        let frame = SampleFrame::new(vec![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0]);
        assert_eq!(detector.detect(frame), PitchEstimate::SILENCE);
    }

    #[test]
    fn test_frame_shorter_than_min_lag() {
        let frame = SampleFrame::new(vec![0.5, -0.5, 0.5, -0.5]);
        assert_eq!(default_detector().detect(frame), PitchEstimate::SILENCE);
    }

    #[test]
    fn test_estimate_formatting() {
        assert_eq!(PitchEstimate::SILENCE.to_string(), "0.0");
        assert_eq!(PitchEstimate(215.31).to_string(), "215.3");
        assert_eq!(PitchEstimate(100.455_58).to_string(), "100.5");
    }

    #[test]
    fn test_detector_is_shareable_across_threads() {
        let detector = std::sync::Arc::new(default_detector());
        let handles: Vec<_> = [150.0f32, 220.0, 300.0]
            .into_iter()
            .map(|freq| {
                let detector = detector.clone();
                std::thread::spawn(move || (freq, detector.detect(sine(freq, 0.5, 0.0, 2048))))
            })
            .collect();

        for handle in handles {
            let (freq, estimate) = handle.join().unwrap();
            let alone = default_detector().detect(sine(freq, 0.5, 0.0, 2048));
            assert_eq!(estimate, alone);
        }
    }
}
