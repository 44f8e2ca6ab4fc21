//! Core signal pipeline for the vitals agent.
//!
//! This module contains:
//! - Window management turning the raw sample stream into overlapping windows
//! - Heart-rate estimation with normalization and range classification
//! - Live smoothing and status-line formatting

pub mod estimator;
pub mod smoother;
pub mod windowing;

// Re-export commonly used types
pub use estimator::{
    classify_bpm, estimate_window, normalize, BpmEstimate, BpmEstimator, EstimateFailure,
    EstimatorError, PeakBpmEstimator, PeakEstimatorConfig, MAX_BPM, MIN_BPM,
};
pub use smoother::{average_bpm, LiveKind, LiveMessage, LiveSmoother};
pub use windowing::{RollingBuffer, Window, WindowCollector};
