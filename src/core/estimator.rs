//! Heart-rate estimation from a single window.
//!
//! The estimation algorithm itself is pluggable through [`BpmEstimator`].
//! This module owns everything around it: amplitude normalization before the
//! call, mapping of estimator failures onto the [`EstimateFailure`] tags, and
//! the physiological range guard applied to every result.

use crate::collector::types::Channel;
use crate::core::windowing::Window;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::PI;
use std::fmt;

/// Lowest heart rate reported as valid.
pub const MIN_BPM: f64 = 20.0;

/// Highest heart rate reported as valid.
pub const MAX_BPM: f64 = 220.0;

/// Added to the standard deviation so flat signals normalize to zeros.
const NORMALIZE_EPSILON: f64 = 1e-9;

/// Why a window produced no usable heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateFailure {
    /// Signal too irregular or weak (usually finger placement)
    Noisy,
    /// The estimator failed internally
    Error,
    /// Estimate outside [`MIN_BPM`, `MAX_BPM`] or not finite
    OutOfRange,
    /// Estimator declined without a specific reason
    Unclassified,
}

impl fmt::Display for EstimateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateFailure::Noisy => write!(f, "noisy"),
            EstimateFailure::Error => write!(f, "error"),
            EstimateFailure::OutOfRange => write!(f, "out_of_range"),
            EstimateFailure::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Per-window estimation result. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BpmEstimate {
    /// A plausible heart rate in beats per minute
    Bpm(f64),
    /// No usable heart rate for this window
    NoSignal(EstimateFailure),
}

impl BpmEstimate {
    pub fn bpm(&self) -> Option<f64> {
        match self {
            BpmEstimate::Bpm(bpm) => Some(*bpm),
            BpmEstimate::NoSignal(_) => None,
        }
    }
}

/// Errors an estimator implementation may report.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimatorError {
    /// Not enough samples to analyse
    InsufficientData { samples: usize },
    /// The signal was analysed but is too noisy to trust
    Noisy,
    /// The estimator declined the window without saying why
    Rejected(String),
    /// Internal failure
    Failed(String),
}

impl fmt::Display for EstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorError::InsufficientData { samples } => {
                write!(f, "insufficient data ({samples} samples)")
            }
            EstimatorError::Noisy => write!(f, "signal too noisy"),
            EstimatorError::Rejected(e) => write!(f, "window rejected: {e}"),
            EstimatorError::Failed(e) => write!(f, "estimation failed: {e}"),
        }
    }
}

impl std::error::Error for EstimatorError {}

/// A heart-rate estimation algorithm.
///
/// `signal` is already amplitude-normalized (zero mean, unit variance).
pub trait BpmEstimator: Send {
    fn estimate(&self, signal: &[f64], sample_hz: f64) -> Result<f64, EstimatorError>;
}

/// Scale a signal to zero mean and unit variance.
pub fn normalize(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mean = signal.iter().mean();
    let std_dev = signal.iter().population_std_dev();
    signal
        .iter()
        .map(|x| (x - mean) / (std_dev + NORMALIZE_EPSILON))
        .collect()
}

/// Apply the physiological range guard to a raw estimator output.
pub fn classify_bpm(raw: f64) -> BpmEstimate {
    if !raw.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&raw) {
        return BpmEstimate::NoSignal(EstimateFailure::OutOfRange);
    }
    BpmEstimate::Bpm(raw)
}

/// Normalize one channel of `window`, run the estimator and classify the result.
pub fn estimate_window(
    estimator: &dyn BpmEstimator,
    window: &Window,
    channel: Channel,
) -> BpmEstimate {
    let signal = normalize(&window.signal(channel));

    match estimator.estimate(&signal, window.sample_hz() as f64) {
        Ok(bpm) => classify_bpm(bpm),
        Err(EstimatorError::Noisy) => BpmEstimate::NoSignal(EstimateFailure::Noisy),
        Err(EstimatorError::Rejected(reason)) => {
            tracing::debug!("Window rejected: {}", reason);
            BpmEstimate::NoSignal(EstimateFailure::Unclassified)
        }
        Err(e) => {
            tracing::debug!("Estimator error: {}", e);
            BpmEstimate::NoSignal(EstimateFailure::Error)
        }
    }
}

/// Tunables for [`PeakBpmEstimator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakEstimatorConfig {
    /// Low-pass cutoff removing high-frequency noise
    pub lowpass_hz: f64,
    /// High-pass cutoff removing baseline wander
    pub highpass_hz: f64,
    /// Fraction of (max - mean) a peak must rise above the mean
    pub threshold_ratio: f64,
    /// Heart rate bounding the refractory distance between peaks
    pub refractory_bpm: f64,
    /// Minimum window length in seconds
    pub min_window_secs: f64,
    /// Maximum coefficient of variation of beat intervals
    pub max_interval_cv: f64,
}

impl Default for PeakEstimatorConfig {
    fn default() -> Self {
        Self {
            lowpass_hz: 5.0,
            highpass_hz: 0.5,
            threshold_ratio: 0.3,
            refractory_bpm: 240.0,
            min_window_secs: 2.0,
            max_interval_cv: 0.5,
        }
    }
}

/// Systolic peak-picking estimator.
///
/// Inverts the reflectance signal, band-limits it to the cardiac band, picks
/// local maxima above an adaptive threshold and converts the median beat interval to BPM.
#[derive(Debug, Clone, Default)]
pub struct PeakBpmEstimator {
    config: PeakEstimatorConfig,
}

impl PeakBpmEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PeakEstimatorConfig) -> Self {
        Self { config }
    }

    /// Indices of systolic peaks in a band-limited signal.
    fn detect_peaks(&self, filtered: &[f64], sample_hz: f64) -> Vec<usize> {
        // Skip the filter transient (1 s, at most a quarter of the window)
        let skip = (sample_hz as usize).min(filtered.len() / 4);
        let steady = &filtered[skip..];
        if steady.len() < 3 {
            return Vec::new();
        }

        let mean = steady.iter().mean();
        let max = steady.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let threshold = mean + self.config.threshold_ratio * (max - mean);
        let min_distance = ((sample_hz * 60.0 / self.config.refractory_bpm) as usize).max(1);

        let mut peaks: Vec<usize> = Vec::new();
        for i in (skip + 1)..filtered.len() - 1 {
            let is_peak = filtered[i] > filtered[i - 1]
                && filtered[i] >= filtered[i + 1]
                && filtered[i] > threshold;
            if !is_peak {
                continue;
            }
            match peaks.last_mut() {
                Some(last) if i - *last < min_distance => {
                    if filtered[i] > filtered[*last] {
                        *last = i;
                    }
                }
                _ => peaks.push(i),
            }
        }
        peaks
    }
}

impl BpmEstimator for PeakBpmEstimator {
    fn estimate(&self, signal: &[f64], sample_hz: f64) -> Result<f64, EstimatorError> {
        if sample_hz <= 0.0 {
            return Err(EstimatorError::Failed(format!(
                "invalid sample rate {sample_hz}"
            )));
        }
        if (signal.len() as f64) < self.config.min_window_secs * sample_hz {
            return Err(EstimatorError::InsufficientData {
                samples: signal.len(),
            });
        }

        // Reflected light falls during systole, so beats are troughs
        let inverted: Vec<f64> = signal.iter().map(|x| -x).collect();
        let smoothed = lowpass(&inverted, sample_hz, self.config.lowpass_hz);
        let filtered = highpass(&smoothed, sample_hz, self.config.highpass_hz);

        let peaks = self.detect_peaks(&filtered, sample_hz);
        if peaks.len() < 3 {
            return Err(EstimatorError::Noisy);
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64 / sample_hz)
            .collect();

        let interval_mean = intervals.iter().mean();
        let cv = intervals.iter().population_std_dev() / interval_mean;
        if !cv.is_finite() || cv > self.config.max_interval_cv {
            return Err(EstimatorError::Noisy);
        }

        let beat = median(intervals);
        if beat <= 0.0 {
            return Err(EstimatorError::Failed("zero beat interval".into()));
        }
        Ok(60.0 / beat)
    }
}

/// First-order RC low-pass filter.
fn lowpass(signal: &[f64], sample_hz: f64, cutoff_hz: f64) -> Vec<f64> {
    let Some(&first) = signal.first() else {
        return Vec::new();
    };
    let dt = 1.0 / sample_hz;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);

    let mut out = Vec::with_capacity(signal.len());
    out.push(first);
    for &x in &signal[1..] {
        let prev = out[out.len() - 1];
        out.push(alpha * x + (1.0 - alpha) * prev);
    }
    out
}

/// First-order RC high-pass filter.
fn highpass(signal: &[f64], sample_hz: f64, cutoff_hz: f64) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / sample_hz;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = rc / (rc + dt);

    let mut out = Vec::with_capacity(signal.len());
    out.push(0.0);
    for i in 1..signal.len() {
        out.push(alpha * (out[i - 1] + signal[i] - signal[i - 1]));
    }
    out
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Sample;

    struct FixedEstimator(Result<f64, EstimatorError>);

    impl BpmEstimator for FixedEstimator {
        fn estimate(&self, _signal: &[f64], _sample_hz: f64) -> Result<f64, EstimatorError> {
            self.0.clone()
        }
    }

    /// Reflectance-style pulse train, one dip per beat.
    fn pulse_train(bpm: f64, sample_hz: f64, secs: f64) -> Vec<f64> {
        let n = (sample_hz * secs) as usize;
        (0..n)
            .map(|i| {
                let phase = (i as f64 / sample_hz * bpm / 60.0).fract();
                let d = (phase - 0.25) / 0.08;
                1000.0 - 40.0 * (-0.5 * d * d).exp()
            })
            .collect()
    }

    fn window_of(values: &[u32]) -> Window {
        Window::new(values.iter().map(|&v| Sample::new(v, v)).collect(), 100)
    }

    #[test]
    fn test_normalize_zero_mean_unit_variance() {
        let normalized = normalize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(normalized.iter().mean().abs() < 1e-9);
        assert!((normalized.iter().population_std_dev() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_flat_signal_is_zero() {
        let normalized = normalize(&[5.0; 16]);
        assert!(normalized.iter().all(|x| *x == 0.0));
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_classify_rejects_out_of_range_and_non_finite() {
        for raw in [f64::NAN, f64::INFINITY, 19.9, 220.1, -5.0, 0.0] {
            assert_eq!(
                classify_bpm(raw),
                BpmEstimate::NoSignal(EstimateFailure::OutOfRange),
                "raw = {raw}"
            );
        }
        assert_eq!(classify_bpm(20.0), BpmEstimate::Bpm(20.0));
        assert_eq!(classify_bpm(220.0), BpmEstimate::Bpm(220.0));
    }

    #[test]
    fn test_estimate_window_maps_failures() {
        let window = window_of(&[1, 2, 3, 4]);
        let cases = [
            (Err(EstimatorError::Noisy), EstimateFailure::Noisy),
            (Err(EstimatorError::Failed("boom".into())), EstimateFailure::Error),
            (
                Err(EstimatorError::InsufficientData { samples: 4 }),
                EstimateFailure::Error,
            ),
            (
                Err(EstimatorError::Rejected("no reason".into())),
                EstimateFailure::Unclassified,
            ),
            (Ok(300.0), EstimateFailure::OutOfRange),
        ];
        for (result, expected) in cases {
            let estimate = estimate_window(&FixedEstimator(result), &window, Channel::Ir);
            assert_eq!(estimate, BpmEstimate::NoSignal(expected));
        }

        let estimate = estimate_window(&FixedEstimator(Ok(64.0)), &window, Channel::Red);
        assert_eq!(estimate.bpm(), Some(64.0));
    }

    #[test]
    fn test_peak_estimator_recovers_heart_rate() {
        let estimator = PeakBpmEstimator::new();
        for bpm in [55.0, 72.0, 110.0] {
            let signal = normalize(&pulse_train(bpm, 100.0, 8.0));
            let estimate = estimator.estimate(&signal, 100.0).unwrap();
            assert!((estimate - bpm).abs() < 4.0, "expected {bpm}, got {estimate}");
        }
    }

    #[test]
    fn test_peak_estimator_honours_min_window() {
        let signal = normalize(&pulse_train(72.0, 100.0, 8.0));
        let strict = PeakBpmEstimator::with_config(PeakEstimatorConfig {
            min_window_secs: 10.0,
            ..PeakEstimatorConfig::default()
        });
        assert_eq!(
            strict.estimate(&signal, 100.0),
            Err(EstimatorError::InsufficientData { samples: 800 })
        );
    }

    #[test]
    fn test_peak_estimator_flat_signal_is_noisy() {
        let estimator = PeakBpmEstimator::new();
        let signal = normalize(&[1000.0; 800]);
        assert_eq!(estimator.estimate(&signal, 100.0), Err(EstimatorError::Noisy));
    }

    #[test]
    fn test_peak_estimator_short_window() {
        let estimator = PeakBpmEstimator::new();
        assert_eq!(
            estimator.estimate(&[0.0; 50], 100.0),
            Err(EstimatorError::InsufficientData { samples: 50 })
        );
        assert_eq!(
            estimator.estimate(&[], 100.0),
            Err(EstimatorError::InsufficientData { samples: 0 })
        );
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
