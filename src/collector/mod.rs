//! Sample collection module for the vitals agent.
//!
//! This module defines the optical sensor capability interface and the
//! drivers shipped with the crate. Register-level drivers for real hardware
//! plug in by implementing [`SensorDriver`].

pub mod driver;
pub mod noop;
pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use driver::{
    configure_best_effort, init_sensor, ConfigureReport, ConfigureStep, DriverError,
    DriverFactory, DriverSettings, LedMode, SensorDriver,
};
pub use noop::NoopDriver;
pub use simulated::{Pacing, SimulatedDriver};
pub use types::{Channel, Sample, SampleBatch};
