//! Vitals Sensor Agent - heart rate and body temperature from low-cost sensors.
//!
//! This library reads a pulse-oximetry style optical sensor (red and infrared
//! LED channels) and a 1-Wire DS18B20 thermometer, and turns them into a live
//! stream of status lines plus a final summary.
//!
//! # Behaviour
//!
//! - **Best effort configuration**: sensor settings the driver cannot apply are skipped
//! - **Overlapping windows**: an 8 s window is re-estimated every 1 s of new data
//! - **Never blocks the producer**: live lines are dropped when the consumer lags
//! - **Bounded recovery**: hardware faults reinitialize the sensor a limited number of times
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vitals Sensor Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Sensor    │──▶│  Windowing  │──▶│  Estimator  │       │
//! │  │   Driver    │   │ (8s / 1s)   │   │ (20-220bpm) │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Session   │◀──│ Live lines  │◀──│  Smoother   │       │
//! │  │  Counters   │   │ (bounded)   │   │   (EMA)     │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                                             │
//! │  ┌─────────────┐                                            │
//! │  │ Thermometer │──▶ tags every live line of a vitals run    │
//! │  │  (DS18B20)  │                                            │
//! │  └─────────────┘                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vitals_sensor_agent::{Config, SimulatedDriver, TemperatureScale, VitalsFacade};
//! use vitals_sensor_agent::collector::{DriverError, SensorDriver};
//!
//! let config = Config::default();
//! let sample_hz = config.hr.sample_hz;
//! let factory = move || -> Result<Box<dyn SensorDriver>, DriverError> {
//!     Ok(Box::new(SimulatedDriver::real_time(72.0, sample_hz)))
//! };
//!
//! let (handle, stream) = VitalsFacade::new(config, Box::new(factory))
//!     .start(20, TemperatureScale::Celsius)
//!     .expect("Failed to start session");
//!
//! for line in stream {
//!     println!("{line}");
//! }
//! println!("{}", serde_json::to_string(&handle.wait()).unwrap());
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod session;
pub mod telemetry;
pub mod thermometer;
pub mod vitals;

// Re-export key types at crate root for convenience
pub use collector::{DriverFactory, NoopDriver, SensorDriver, SimulatedDriver};
pub use config::{Config, HrConfig, ThermometerConfig};
pub use core::{BpmEstimate, BpmEstimator, LiveMessage, PeakBpmEstimator, WindowCollector};
pub use session::{HeartRateSummary, SessionError, SessionHandle, SessionState, VitalsSession};
pub use telemetry::{SessionCounters, SharedCounters};
pub use thermometer::{Rounding, TemperatureReading, TemperatureScale, Thermometer};
pub use vitals::{read_temp, TemperatureReport, VitalsFacade, VitalsReport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
