//! Capability interface for the optical (PPG) sensor.
//!
//! The session only needs a small set of operations from the hardware: a
//! reset, a handful of configuration knobs, and a non-blocking FIFO poll.
//! Register programming and I2C addressing stay inside the driver.
//!
//! Configuration setters are optional capabilities. A driver that cannot
//! honour one returns [`DriverError::Unsupported`] (the default), and
//! [`configure_best_effort`] simply moves on to the next step.

use crate::collector::types::SampleBatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;

/// LED operating mode of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedMode {
    /// Red LED only
    HeartRate,
    /// Red and IR LEDs
    SpO2,
    /// Individually slotted LEDs
    MultiLed,
}

/// Settings pushed to the sensor after every (re)initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Number of samples averaged in the sensor FIFO
    pub sample_averaging: u8,
    /// ADC full-scale range in nA
    pub adc_range: u32,
    /// Sensor sample rate in Hz
    pub sample_rate: u32,
    /// LED currents in mA as (red, ir)
    pub led_current_ma: (f32, f32),
    /// LED mode
    pub mode: LedMode,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            sample_averaging: 4,
            adc_range: 2048,
            sample_rate: 100,
            led_current_ma: (12.5, 12.5),
            mode: LedMode::SpO2,
        }
    }
}

/// Errors reported by a sensor driver.
#[derive(Debug)]
pub enum DriverError {
    /// Bus-level I/O failure (I2C NACK, remote I/O error, ...)
    Bus(std::io::Error),
    /// The driver does not implement this operation
    Unsupported(&'static str),
    /// Any other device-reported failure
    Device(String),
}

impl DriverError {
    /// Whether this error calls for discarding and reinitializing the driver.
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, DriverError::Bus(_))
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Bus(e) => write!(f, "{e}"),
            DriverError::Unsupported(op) => write!(f, "operation not supported: {op}"),
            DriverError::Device(e) => write!(f, "device error: {e}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Bus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Bus(e)
    }
}

/// Operations the acquisition pipeline needs from the optical sensor.
pub trait SensorDriver: Send {
    /// Soft-reset the device.
    fn reset(&mut self) -> Result<(), DriverError>;

    fn set_fifo_average(&mut self, _samples: u8) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("set_fifo_average"))
    }

    fn set_adc_range(&mut self, _range_na: u32) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("set_adc_range"))
    }

    fn set_sample_rate(&mut self, _hz: u32) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("set_sample_rate"))
    }

    fn set_led_current(&mut self, _red_ma: f32, _ir_ma: f32) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("set_led_current"))
    }

    fn set_mode(&mut self, _mode: LedMode) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("set_mode"))
    }

    /// Drain whatever is in the sensor FIFO without blocking.
    ///
    /// Returns empty lists when no new data is ready.
    fn read_sequential(&mut self) -> Result<SampleBatch, DriverError>;
}

/// Opens fresh driver instances; called again after every hardware fault.
pub trait DriverFactory: Send {
    fn open(&mut self) -> Result<Box<dyn SensorDriver>, DriverError>;
}

impl<F> DriverFactory for F
where
    F: FnMut() -> Result<Box<dyn SensorDriver>, DriverError> + Send,
{
    fn open(&mut self) -> Result<Box<dyn SensorDriver>, DriverError> {
        self()
    }
}

/// One step of the fixed configuration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureStep {
    Reset,
    FifoAverage,
    AdcRange,
    SampleRate,
    LedCurrent,
    Mode,
}

impl ConfigureStep {
    /// Steps in the order they are applied.
    pub const SEQUENCE: [ConfigureStep; 6] = [
        ConfigureStep::Reset,
        ConfigureStep::FifoAverage,
        ConfigureStep::AdcRange,
        ConfigureStep::SampleRate,
        ConfigureStep::LedCurrent,
        ConfigureStep::Mode,
    ];

    fn apply(
        self,
        driver: &mut dyn SensorDriver,
        settings: &DriverSettings,
    ) -> Result<(), DriverError> {
        match self {
            ConfigureStep::Reset => driver.reset(),
            ConfigureStep::FifoAverage => driver.set_fifo_average(settings.sample_averaging),
            ConfigureStep::AdcRange => driver.set_adc_range(settings.adc_range),
            ConfigureStep::SampleRate => driver.set_sample_rate(settings.sample_rate),
            ConfigureStep::LedCurrent => {
                let (red, ir) = settings.led_current_ma;
                driver.set_led_current(red, ir)
            }
            ConfigureStep::Mode => driver.set_mode(settings.mode),
        }
    }
}

/// Outcome of a best-effort configuration pass.
#[derive(Debug, Default)]
pub struct ConfigureReport {
    pub applied: Vec<ConfigureStep>,
    pub skipped: Vec<(ConfigureStep, DriverError)>,
}

impl ConfigureReport {
    pub fn fully_applied(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Run every configuration step, ignoring individual failures.
///
/// Partial configuration still lets acquisition proceed, so a failing step
/// never aborts the remaining ones.
pub fn configure_best_effort(
    driver: &mut dyn SensorDriver,
    settings: &DriverSettings,
) -> ConfigureReport {
    let mut report = ConfigureReport::default();

    for step in ConfigureStep::SEQUENCE {
        match step.apply(driver, settings) {
            Ok(()) => report.applied.push(step),
            Err(e) => {
                tracing::debug!("Configure step {:?} skipped: {}", step, e);
                report.skipped.push((step, e));
            }
        }
    }

    report
}

/// Open a driver, configure it and wait for the sensor to settle.
///
/// Only a failure to open the device is reported; configuration is best-effort.
pub fn init_sensor(
    factory: &mut dyn DriverFactory,
    settings: &DriverSettings,
    settle_delay: Duration,
) -> Result<Box<dyn SensorDriver>, DriverError> {
    let mut driver = factory.open()?;
    let report = configure_best_effort(driver.as_mut(), settings);
    tracing::debug!(
        "Sensor configured: {} steps applied, {} skipped",
        report.applied.len(),
        report.skipped.len()
    );
    thread::sleep(settle_delay);
    Ok(driver)
}
