//! Live BPM smoothing and status-line formatting.
//!
//! Valid estimates pass through an exponential moving average before being
//! shown; the smoothed values are also what the final session average is
//! computed from. Failed estimates leave the smoother untouched and only
//! produce a status line.

use crate::core::estimator::{BpmEstimate, EstimateFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a live line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum LiveKind {
    /// Rounded smoothed heart rate
    Bpm(u32),
    /// No usable heart rate this window
    NoSignal(EstimateFailure),
    /// Sensor fault, driver is being reinitialized
    HardwareFault,
    /// Per-window processing failure
    UnexpectedFault,
}

/// One human-readable status line emitted during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub emitted_at: DateTime<Utc>,
    pub kind: LiveKind,
    pub text: String,
}

impl LiveMessage {
    fn new(kind: LiveKind, text: String) -> Self {
        Self {
            emitted_at: Utc::now(),
            kind,
            text,
        }
    }

    /// Line for a smoothed heart rate.
    pub fn bpm(smoothed: f64) -> Self {
        let rounded = smoothed.round().max(0.0) as u32;
        Self::new(LiveKind::Bpm(rounded), format!("LIVE  {rounded} BPM"))
    }

    /// Line for a window without a usable heart rate.
    pub fn no_signal(reason: EstimateFailure) -> Self {
        let text = match reason {
            EstimateFailure::Noisy => "LIVE  --  (noisy / adjust finger)",
            EstimateFailure::Error => "LIVE  --  (processing error)",
            EstimateFailure::OutOfRange => "LIVE  --  (out of range)",
            EstimateFailure::Unclassified => "LIVE  --",
        };
        Self::new(LiveKind::NoSignal(reason), text.to_string())
    }

    /// Diagnostic line for a sensor fault.
    pub fn hardware_fault(error: impl fmt::Display) -> Self {
        Self::new(
            LiveKind::HardwareFault,
            format!("I2C error: {error}. Reinitializing…"),
        )
    }

    /// Diagnostic line for a failure while processing a window.
    pub fn unexpected(error: impl fmt::Display) -> Self {
        Self::new(LiveKind::UnexpectedFault, format!("Unexpected error: {error}"))
    }

    /// The rounded heart rate, if this line carries one.
    pub fn bpm_value(&self) -> Option<u32> {
        match self.kind {
            LiveKind::Bpm(bpm) => Some(bpm),
            _ => None,
        }
    }
}

impl fmt::Display for LiveMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Exponential moving average over valid estimates plus the accepted list.
#[derive(Debug, Clone)]
pub struct LiveSmoother {
    alpha: f64,
    smoothed: Option<f64>,
    accepted: Vec<f64>,
}

impl LiveSmoother {
    /// Create a smoother with weight `alpha` on the newest value.
    ///
    /// `alpha` is expected in (0, 1); `HrConfig::validate` enforces this.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            smoothed: None,
            accepted: Vec::new(),
        }
    }

    /// Feed one estimate and get the line to show for it.
    pub fn observe(&mut self, estimate: BpmEstimate) -> LiveMessage {
        match estimate {
            BpmEstimate::Bpm(raw) => {
                let smoothed = match self.smoothed {
                    None => raw,
                    Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
                };
                self.smoothed = Some(smoothed);
                self.accepted.push(smoothed);
                LiveMessage::bpm(smoothed)
            }
            BpmEstimate::NoSignal(reason) => LiveMessage::no_signal(reason),
        }
    }

    /// Current smoothed value.
    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    /// Smoothed values accepted so far, oldest first.
    pub fn accepted(&self) -> &[f64] {
        &self.accepted
    }

    /// Rounded arithmetic mean of the accepted values.
    pub fn average(&self) -> Option<u32> {
        average_bpm(&self.accepted)
    }
}

/// Rounded mean of a list of BPM values; `None` when the list is empty.
pub fn average_bpm(values: &[f64]) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if !mean.is_finite() {
        return None;
    }
    Some(mean.round().max(0.0) as u32)
}
