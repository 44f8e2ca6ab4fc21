//! DS18B20 1-Wire thermometer reader.
//!
//! The kernel `w1_therm` driver exposes each probe as a directory under
//! `/sys/bus/w1/devices/` named `28-<serial>`, containing a two-line
//! `w1_slave` pseudo-file:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends with `YES` when the CRC check passed; the second line
//! carries the temperature in millidegrees Celsius.

use crate::config::ThermometerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;

/// Temperature scale of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureScale {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
}

impl TemperatureScale {
    /// Key used for the value in result payloads.
    pub fn key(&self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "tempC",
            TemperatureScale::Fahrenheit => "tempF",
        }
    }

    /// Tag prefixed to live lines.
    pub fn tag(&self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "TEMPC",
            TemperatureScale::Fahrenheit => "TEMPF",
        }
    }
}

impl fmt::Display for TemperatureScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureScale::Celsius => write!(f, "C"),
            TemperatureScale::Fahrenheit => write!(f, "F"),
        }
    }
}

impl FromStr for TemperatureScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "C" => Ok(TemperatureScale::Celsius),
            "F" => Ok(TemperatureScale::Fahrenheit),
            other => Err(format!("unknown temperature scale '{other}' (expected C or F)")),
        }
    }
}

/// How the Celsius value is rounded before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Round to one decimal place
    #[default]
    Nearest,
    Floor,
    Ceil,
}

impl Rounding {
    pub fn apply(&self, celsius: f64) -> f64 {
        match self {
            Rounding::Nearest => round1(celsius),
            Rounding::Floor => celsius.floor(),
            Rounding::Ceil => celsius.ceil(),
        }
    }
}

impl FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nearest" => Ok(Rounding::Nearest),
            "floor" => Ok(Rounding::Floor),
            "ceil" => Ok(Rounding::Ceil),
            other => Err(format!(
                "unknown rounding '{other}' (expected nearest, floor or ceil)"
            )),
        }
    }
}

/// A converted, rounded temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub value: f64,
    pub unit: TemperatureScale,
}

impl TemperatureReading {
    /// Build a reading from Celsius, converting at the output boundary.
    pub fn from_celsius(celsius: f64, scale: TemperatureScale) -> Self {
        let value = match scale {
            TemperatureScale::Celsius => celsius,
            TemperatureScale::Fahrenheit => celsius_to_fahrenheit(celsius),
        };
        Self { value, unit: scale }
    }

    /// Constant tag prefixed to live lines, e.g. `TEMPC 23.4`.
    pub fn tag(&self) -> String {
        format!("{} {:.1}", self.unit.tag(), self.value)
    }
}

/// `F = C × 9/5 + 32`, rounded to one decimal.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    round1(celsius * 9.0 / 5.0 + 32.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Errors that can occur while reading the thermometer.
#[derive(Debug)]
pub enum ThermometerError {
    /// No `28-*` device directory under the base directory
    DeviceNotFound { base_dir: PathBuf },
    /// Every attempt returned a reading whose CRC line was not `YES`
    CrcInvalid { attempts: u32 },
    Io(std::io::Error),
    /// The temperature field could not be parsed
    Parse(String),
}

impl fmt::Display for ThermometerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermometerError::DeviceNotFound { base_dir } => write!(
                f,
                "No DS18B20 found under {}. Enable 1-Wire and check wiring \
                 (GPIO4 / pin 7, 4.7k pull-up to 3.3V).",
                base_dir.display()
            ),
            ThermometerError::CrcInvalid { .. } => {
                write!(f, "Failed to get a valid reading (CRC not YES).")
            }
            ThermometerError::Io(e) => write!(f, "IO error: {e}"),
            ThermometerError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for ThermometerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ThermometerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ThermometerError {
    fn from(e: std::io::Error) -> Self {
        ThermometerError::Io(e)
    }
}

/// Parse the contents of a `w1_slave` file.
///
/// Returns `Ok(None)` when the reading is not valid yet (CRC not `YES` or the
/// temperature field missing), which callers treat as retryable.
pub fn parse_w1_slave(contents: &str) -> Result<Option<f64>, ThermometerError> {
    let lines: Vec<&str> = contents.trim().lines().collect();
    if lines.len() < 2 || !lines[0].trim().ends_with("YES") {
        return Ok(None);
    }

    let Some(pos) = lines[1].find("t=") else {
        return Ok(None);
    };
    let raw = lines[1][pos + 2..].trim();
    let millidegrees: i64 = raw
        .parse()
        .map_err(|e| ThermometerError::Parse(format!("invalid temperature '{raw}': {e}")))?;

    Ok(Some(millidegrees as f64 / 1000.0))
}

/// Reader for a single 1-Wire thermometer.
#[derive(Debug, Clone)]
pub struct Thermometer {
    config: ThermometerConfig,
}

impl Thermometer {
    pub fn new(config: ThermometerConfig) -> Self {
        Self { config }
    }

    /// Find the `w1_slave` file of the first matching probe.
    pub fn locate_device(&self) -> Result<PathBuf, ThermometerError> {
        let not_found = || ThermometerError::DeviceNotFound {
            base_dir: self.config.base_dir.clone(),
        };

        let entries = match std::fs::read_dir(&self.config.base_dir) {
            Ok(entries) => entries,
            Err(_) => return Err(not_found()),
        };

        let mut devices: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(&self.config.device_prefix)
            })
            .map(|e| e.path())
            .collect();
        devices.sort();

        if devices.len() > 1 {
            tracing::warn!(
                "Found {} thermometers, using {:?}",
                devices.len(),
                devices[0]
            );
        }

        devices
            .into_iter()
            .next()
            .map(|dir| dir.join(&self.config.slave_file))
            .ok_or_else(not_found)
    }

    /// Read the temperature in °C, retrying transient invalid readings.
    pub fn read_celsius(&self) -> Result<f64, ThermometerError> {
        let device = self.locate_device()?;
        self.read_celsius_from(&device)
    }

    fn read_celsius_from(&self, device: &Path) -> Result<f64, ThermometerError> {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let contents = std::fs::read_to_string(device)?;
            if let Some(celsius) = parse_w1_slave(&contents)? {
                return Ok(celsius);
            }
            tracing::debug!("Invalid thermometer reading (attempt {}/{})", attempt, attempts);
            if attempt < attempts {
                thread::sleep(self.config.retry_delay);
            }
        }

        Err(ThermometerError::CrcInvalid { attempts })
    }

    /// Read, round and convert the temperature.
    pub fn read(
        &self,
        scale: TemperatureScale,
        rounding: Rounding,
    ) -> Result<TemperatureReading, ThermometerError> {
        let celsius = rounding.apply(self.read_celsius()?);
        Ok(TemperatureReading::from_celsius(celsius, scale))
    }
}
