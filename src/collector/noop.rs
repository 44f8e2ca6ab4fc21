//! Noop implementation of the sensor driver.
//!
//! This exists so the agent (and binary) can run on machines without an
//! optical sensor attached. Every poll reports an empty FIFO.

use crate::collector::driver::{DriverError, LedMode, SensorDriver};
use crate::collector::types::SampleBatch;

/// A driver that accepts any configuration but never produces samples.
#[derive(Debug, Default)]
pub struct NoopDriver {
    resets: u32,
    polls: u64,
}

impl NoopDriver {
    /// Create a new noop driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the driver was reset.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Number of FIFO polls served.
    pub fn polls(&self) -> u64 {
        self.polls
    }
}

impl SensorDriver for NoopDriver {
    fn reset(&mut self) -> Result<(), DriverError> {
        self.resets += 1;
        Ok(())
    }

    fn set_fifo_average(&mut self, _samples: u8) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_adc_range(&mut self, _range_na: u32) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_sample_rate(&mut self, _hz: u32) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_led_current(&mut self, _red_ma: f32, _ir_ma: f32) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_mode(&mut self, _mode: LedMode) -> Result<(), DriverError> {
        Ok(())
    }

    fn read_sequential(&mut self) -> Result<SampleBatch, DriverError> {
        self.polls += 1;
        Ok(SampleBatch::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::driver::{configure_best_effort, DriverSettings};

    #[test]
    fn test_noop_driver_never_has_data() {
        let mut driver = NoopDriver::new();
        for _ in 0..3 {
            assert!(!driver.read_sequential().unwrap().has_data());
        }
        assert_eq!(driver.polls(), 3);
    }

    #[test]
    fn test_noop_driver_accepts_configuration() {
        let mut driver = NoopDriver::new();
        let report = configure_best_effort(&mut driver, &DriverSettings::default());
        assert!(report.fully_applied());
        assert_eq!(driver.resets(), 1);
    }
}
