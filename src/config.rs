//! Configuration for the vitals agent.

use crate::collector::driver::DriverSettings;
use crate::collector::types::Channel;
use crate::core::estimator::PeakEstimatorConfig;
use crate::thermometer::TemperatureScale;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest analysis window accepted by [`HrConfig::validate`].
pub const MAX_WINDOW_SECS: f64 = 600.0;

/// Highest sample rate accepted by [`HrConfig::validate`].
pub const MAX_SAMPLE_HZ: u32 = 3200;

/// Main configuration for the vitals agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Wall-clock length of one measurement session
    #[serde(with = "duration_serde")]
    pub session_duration: Duration,

    /// Scale temperatures are reported in
    pub scale: TemperatureScale,

    /// Heart-rate pipeline tunables
    pub hr: HrConfig,

    /// 1-Wire thermometer location and retry policy
    pub thermometer: ThermometerConfig,

    /// Path for storing cumulative session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vitals-sensor-agent");

        Self {
            session_duration: Duration::from_secs(20),
            scale: TemperatureScale::Celsius,
            hr: HrConfig::default(),
            thermometer: ThermometerConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.hr.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vitals-sensor-agent")
            .join("config.json")
    }

    /// Path of the persisted session statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Heart-rate acquisition and estimation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrConfig {
    /// Nominal sensor sample rate in Hz
    pub sample_hz: u32,
    /// Analysis window length in seconds
    pub window_secs: f64,
    /// Seconds of new data between live updates
    pub step_secs: f64,
    /// EMA weight of the newest estimate, in (0, 1)
    pub ema_alpha: f64,
    /// Channel the heart rate is estimated from
    pub channel: Channel,
    /// Driver reinitializations allowed before the session ends early
    pub max_resets: u32,
    /// Capacity of the live message channel
    pub live_capacity: usize,
    /// Lower bound of the initial fill timeout
    #[serde(with = "duration_serde")]
    pub fill_timeout_floor: Duration,
    /// Sleep between polls while filling the first window
    #[serde(with = "millis_serde")]
    pub fill_poll: Duration,
    /// Sleep between polls while streaming
    #[serde(with = "millis_serde")]
    pub stream_poll: Duration,
    /// Wait after configuring the sensor
    #[serde(with = "millis_serde")]
    pub settle_delay: Duration,
    /// Wait before reinitializing after a hardware fault
    #[serde(with = "millis_serde")]
    pub reset_backoff: Duration,
    /// Wait after an unexpected per-window failure
    #[serde(with = "millis_serde")]
    pub fault_backoff: Duration,
    /// Settings pushed to the sensor on every initialization
    pub driver: DriverSettings,
    /// Tunables of the default peak-picking estimator
    #[serde(default)]
    pub estimator: PeakEstimatorConfig,
}

impl Default for HrConfig {
    fn default() -> Self {
        Self {
            sample_hz: 100,
            window_secs: 8.0,
            step_secs: 1.0,
            ema_alpha: 0.25,
            channel: Channel::Ir,
            max_resets: 3,
            live_capacity: 256,
            fill_timeout_floor: Duration::from_secs(30),
            fill_poll: Duration::from_millis(5),
            stream_poll: Duration::from_millis(1),
            settle_delay: Duration::from_millis(100),
            reset_backoff: Duration::from_millis(500),
            fault_backoff: Duration::from_millis(200),
            driver: DriverSettings::default(),
            estimator: PeakEstimatorConfig::default(),
        }
    }
}

impl HrConfig {
    /// Samples per analysis window.
    pub fn window_len(&self) -> usize {
        (self.sample_hz as f64 * self.window_secs).round() as usize
    }

    /// New samples required before the next window is emitted.
    pub fn step_len(&self) -> usize {
        ((self.sample_hz as f64 * self.step_secs).round() as usize).max(1)
    }

    /// Longest time the initial fill may take: 3 windows, at least the floor.
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_secs_f64(3.0 * self.window_secs.max(0.0)).max(self.fill_timeout_floor)
    }

    /// Check the tunables for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "ema_alpha must be in (0, 1), got {}",
                self.ema_alpha
            )));
        }
        if self.sample_hz == 0 || self.sample_hz > MAX_SAMPLE_HZ {
            return Err(ConfigError::Invalid(format!(
                "sample_hz must be in 1..={MAX_SAMPLE_HZ}, got {}",
                self.sample_hz
            )));
        }
        if !self.window_secs.is_finite() || self.window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "window_secs must be finite and at most {MAX_WINDOW_SECS}, got {}",
                self.window_secs
            )));
        }
        if !self.step_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "step_secs must be finite, got {}",
                self.step_secs
            )));
        }
        if self.window_len() == 0 {
            return Err(ConfigError::Invalid(
                "window_secs must cover at least one sample".into(),
            ));
        }
        if !(self.step_secs > 0.0) || self.step_secs > self.window_secs {
            return Err(ConfigError::Invalid(format!(
                "step_secs must be in (0, window_secs], got {}",
                self.step_secs
            )));
        }
        if self.live_capacity == 0 {
            return Err(ConfigError::Invalid("live_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Location and retry policy of the 1-Wire thermometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermometerConfig {
    /// Directory holding 1-Wire device entries
    pub base_dir: PathBuf,
    /// Name prefix identifying DS18B20 probes
    pub device_prefix: String,
    /// Pseudo-file holding the reading
    pub slave_file: String,
    /// Reads attempted before giving up on an invalid CRC
    pub max_attempts: u32,
    /// Wait between attempts
    #[serde(with = "millis_serde")]
    pub retry_delay: Duration,
}

impl Default for ThermometerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/sys/bus/w1/devices/"),
            device_prefix: "28-".to_string(),
            slave_file: "w1_slave".to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
