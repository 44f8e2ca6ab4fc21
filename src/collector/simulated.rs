//! Synthetic PPG driver.
//!
//! Produces a pulsatile waveform at a fixed heart rate on top of a DC
//! baseline for both LED channels. Used by the CLI when no sensor is
//! attached and by the integration tests.

use crate::collector::driver::{DriverError, SensorDriver};
use crate::collector::types::SampleBatch;
use std::f64::consts::PI;
use std::time::Instant;

/// DC baselines in raw ADC counts. IR is typically the stronger channel.
const RED_DC: f64 = 50_000.0;
const IR_DC: f64 = 80_000.0;

/// Pulsatile modulation depth (AC/DC).
const RED_AC_DC: f64 = 0.012;
const IR_AC_DC: f64 = 0.02;

/// Width of the systolic pulse as a fraction of the beat period.
const PULSE_WIDTH: f64 = 0.08;

/// How samples are released to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Release as many samples as wall-clock time since the last poll allows.
    RealTime,
    /// Release a fixed number of samples per poll regardless of time.
    Burst(usize),
}

/// A driver that synthesizes a clean PPG signal.
#[derive(Debug)]
pub struct SimulatedDriver {
    bpm: f64,
    sample_hz: u32,
    pacing: Pacing,
    /// Index of the next sample to generate
    cursor: u64,
    last_poll: Option<Instant>,
    /// Fractional samples owed from the previous poll
    carry: f64,
}

impl SimulatedDriver {
    /// Create a driver producing `bpm` beats per minute at `sample_hz`.
    pub fn new(bpm: f64, sample_hz: u32, pacing: Pacing) -> Self {
        Self {
            bpm,
            sample_hz: sample_hz.max(1),
            pacing,
            cursor: 0,
            last_poll: None,
            carry: 0.0,
        }
    }

    /// A real-time driver, as the CLI uses it.
    pub fn real_time(bpm: f64, sample_hz: u32) -> Self {
        Self::new(bpm, sample_hz, Pacing::RealTime)
    }

    /// Total number of samples produced so far.
    pub fn samples_produced(&self) -> u64 {
        self.cursor
    }

    fn pending_samples(&mut self) -> usize {
        match self.pacing {
            Pacing::Burst(n) => n,
            Pacing::RealTime => {
                let now = Instant::now();
                let Some(last) = self.last_poll.replace(now) else {
                    return 0;
                };
                let owed = now.duration_since(last).as_secs_f64() * self.sample_hz as f64
                    + self.carry;
                let whole = owed.floor();
                self.carry = owed - whole;
                whole as usize
            }
        }
    }

    /// Normalized pulse shape in [0, 1] at the given time.
    fn pulse(&self, t: f64) -> f64 {
        let phase = (t * self.bpm / 60.0).fract();
        let d = (phase - 0.25) / PULSE_WIDTH;
        (-0.5 * d * d).exp()
    }

    fn sample_at(&self, index: u64) -> (u32, u32) {
        let t = index as f64 / self.sample_hz as f64;
        // Slow respiratory baseline wander, well below the cardiac band
        let wander = 0.002 * (2.0 * PI * 0.1 * t).sin();
        let pulse = self.pulse(t);

        // Reflected light drops as blood volume rises
        let red = RED_DC * (1.0 + wander - RED_AC_DC * pulse);
        let ir = IR_DC * (1.0 + wander - IR_AC_DC * pulse);
        (red.round() as u32, ir.round() as u32)
    }
}

impl SensorDriver for SimulatedDriver {
    fn reset(&mut self) -> Result<(), DriverError> {
        self.last_poll = None;
        self.carry = 0.0;
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<(), DriverError> {
        if hz == 0 {
            return Err(DriverError::Device("sample rate must be positive".into()));
        }
        self.sample_hz = hz;
        Ok(())
    }

    fn read_sequential(&mut self) -> Result<SampleBatch, DriverError> {
        let count = self.pending_samples();
        let mut batch = SampleBatch {
            red: Vec::with_capacity(count),
            ir: Vec::with_capacity(count),
        };

        for _ in 0..count {
            let (red, ir) = self.sample_at(self.cursor);
            batch.red.push(red);
            batch.ir.push(ir);
            self.cursor += 1;
        }

        Ok(batch)
    }
}
