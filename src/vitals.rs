//! Combined temperature and heart-rate measurement.
//!
//! [`VitalsFacade::start`] reads the thermometer once, synchronously, then
//! starts a heart-rate session. Live lines are tagged with the (constant)
//! temperature. When the thermometer fails the heart-rate session still
//! runs so the user gets live feedback, but the final report is a failure
//! carrying the temperature error.

use crate::collector::driver::DriverFactory;
use crate::config::{Config, ConfigError, ThermometerConfig};
use crate::core::estimator::{BpmEstimator, PeakBpmEstimator};
use crate::session::{HeartRateSummary, LiveStream, SessionError, SessionHandle, VitalsSession};
use crate::telemetry::SharedCounters;
use crate::thermometer::{Rounding, TemperatureReading, TemperatureScale, Thermometer};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::time::Duration;

/// Result of a single temperature read, shaped for callers.
///
/// Serializes as `{"ok":true,"tempC":23.4}` or `{"ok":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReport {
    pub reading: Result<TemperatureReading, String>,
}

impl TemperatureReport {
    pub fn is_ok(&self) -> bool {
        self.reading.is_ok()
    }
}

impl Serialize for TemperatureReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match &self.reading {
            Ok(reading) => {
                map.serialize_entry("ok", &true)?;
                map.serialize_entry(reading.unit.key(), &reading.value)?;
            }
            Err(error) => {
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

/// Read the thermometer once and report the outcome without failing.
pub fn read_temp(
    config: &ThermometerConfig,
    scale: TemperatureScale,
    rounding: Rounding,
) -> TemperatureReport {
    let reading = Thermometer::new(config.clone())
        .read(scale, rounding)
        .map_err(|e| e.to_string());
    TemperatureReport { reading }
}

/// Final result of a vitals measurement.
///
/// Serializes as `{"ok":true,"avg_hr":72,"tempC":23.4}` on success and
/// `{"ok":false,"error":"..."}` on failure.
#[derive(Debug, Clone)]
pub struct VitalsReport {
    pub ok: bool,
    pub avg_hr: Option<u32>,
    pub temperature: Option<TemperatureReading>,
    pub error: Option<String>,
    /// Full session summary, when the session completed
    pub heart_rate: Option<HeartRateSummary>,
}

impl VitalsReport {
    fn success(temperature: TemperatureReading, summary: HeartRateSummary) -> Self {
        Self {
            ok: true,
            avg_hr: summary.average_bpm,
            temperature: Some(temperature),
            error: None,
            heart_rate: Some(summary),
        }
    }

    fn failure(error: String, heart_rate: Option<HeartRateSummary>) -> Self {
        Self {
            ok: false,
            avg_hr: None,
            temperature: None,
            error: Some(error),
            heart_rate,
        }
    }
}

impl Serialize for VitalsReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("ok", &self.ok)?;
        if self.ok {
            map.serialize_entry("avg_hr", &self.avg_hr)?;
            if let Some(reading) = &self.temperature {
                map.serialize_entry(reading.unit.key(), &reading.value)?;
            }
        } else if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// Deferred access to the final [`VitalsReport`].
pub struct VitalsHandle {
    session: SessionHandle,
    temperature: Result<TemperatureReading, String>,
}

impl VitalsHandle {
    /// The temperature read before the session started.
    pub fn temperature(&self) -> Result<&TemperatureReading, &str> {
        self.temperature.as_ref().map_err(|e| e.as_str())
    }

    /// Block until the heart-rate session is done and build the report.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`VitalsHandle::wait_async`] there.
    pub fn wait(self) -> VitalsReport {
        let session = self.session.wait();
        Self::report(self.temperature, session)
    }

    /// Await the heart-rate session and build the report.
    pub async fn wait_async(self) -> VitalsReport {
        let session = self.session.wait_async().await;
        Self::report(self.temperature, session)
    }

    fn report(
        temperature: Result<TemperatureReading, String>,
        session: Result<HeartRateSummary, SessionError>,
    ) -> VitalsReport {
        match (temperature, session) {
            // Heart-rate data is only streamed live when the thermometer failed
            (Err(error), session) => VitalsReport::failure(error, session.ok()),
            (Ok(temperature), Ok(summary)) => VitalsReport::success(temperature, summary),
            (Ok(_), Err(e)) => VitalsReport::failure(e.to_string(), None),
        }
    }
}

enum StreamMode {
    /// Prefix every line with the temperature tag
    Tagged(String),
    /// Emit the temperature error first, then untagged lines
    TemperatureError { pending: Option<String> },
}

/// Live lines of a vitals measurement, as plain text.
pub struct VitalsStream {
    live: LiveStream,
    mode: StreamMode,
}

impl Iterator for VitalsStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match &mut self.mode {
            StreamMode::Tagged(tag) => self.live.next().map(|line| format!("{tag} | {line}")),
            StreamMode::TemperatureError { pending } => match pending.take() {
                Some(line) => Some(line),
                None => self.live.next().map(|line| line.text),
            },
        }
    }
}

/// Entry point combining the thermometer and a heart-rate session.
pub struct VitalsFacade {
    config: Config,
    factory: Box<dyn DriverFactory>,
    estimator: Box<dyn BpmEstimator>,
    counters: Option<SharedCounters>,
}

impl VitalsFacade {
    /// Create a facade using the peak-picking estimator tuned by `config.hr.estimator`.
    pub fn new(config: Config, factory: Box<dyn DriverFactory>) -> Self {
        let estimator = PeakBpmEstimator::with_config(config.hr.estimator.clone());
        Self {
            config,
            factory,
            estimator: Box::new(estimator),
            counters: None,
        }
    }

    pub fn with_estimator(mut self, estimator: Box<dyn BpmEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_counters(mut self, counters: SharedCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Read the temperature, then start a heart-rate session of `duration_secs`.
    pub fn start(
        self,
        duration_secs: u32,
        scale: TemperatureScale,
    ) -> Result<(VitalsHandle, VitalsStream), SessionError> {
        if duration_secs == 0 {
            return Err(SessionError::InvalidConfig(ConfigError::Invalid(
                "session duration must be positive".into(),
            )));
        }

        let temperature = read_temp(&self.config.thermometer, scale, Rounding::Nearest).reading;
        if let Err(e) = &temperature {
            tracing::warn!("Temperature read failed, continuing with heart rate only: {}", e);
        }

        let mut session = VitalsSession::new(self.config.hr, self.factory, self.estimator);
        if let Some(counters) = self.counters {
            session = session.with_counters(counters);
        }
        let (handle, live) = session.spawn(Duration::from_secs(u64::from(duration_secs)))?;

        let mode = match &temperature {
            Ok(reading) => StreamMode::Tagged(reading.tag()),
            Err(error) => StreamMode::TemperatureError {
                pending: Some(format!("TEMP ERROR: {error}")),
            },
        };

        Ok((
            VitalsHandle {
                session: handle,
                temperature,
            },
            VitalsStream { live, mode },
        ))
    }
}
