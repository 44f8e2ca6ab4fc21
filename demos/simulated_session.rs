//! Demonstration of a heart-rate session on the simulated sensor.
//!
//! This example shows how to:
//! 1. Build a driver factory around the synthetic PPG driver
//! 2. Start a session and print its live lines as they arrive
//! 3. Inspect the final summary and the session counters
//!
//! Run with: cargo run --example simulated_session
//!
//! Set RUST_LOG=debug to watch the session state transitions.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vitals_sensor_agent::{
    collector::{DriverError, SensorDriver, SimulatedDriver},
    config::HrConfig,
    core::PeakBpmEstimator,
    session::VitalsSession,
    telemetry::create_shared_counters,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Vitals Sensor Agent - Simulated Session");
    println!("=======================================");
    println!();

    let config = HrConfig::default();
    let sample_hz = config.sample_hz;
    println!(
        "Window: {}s, update every {}s, {} Hz",
        config.window_secs, config.step_secs, sample_hz
    );
    println!("The first value appears once a full window is buffered.");
    println!();

    let factory = move || -> Result<Box<dyn SensorDriver>, DriverError> {
        Ok(Box::new(SimulatedDriver::real_time(68.0, sample_hz)))
    };
    let counters = create_shared_counters();
    let estimator = PeakBpmEstimator::with_config(config.estimator.clone());
    let session = VitalsSession::new(config, Box::new(factory), Box::new(estimator))
        .with_counters(counters.clone());

    let (handle, stream) = match session.spawn(Duration::from_secs(15)) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Failed to start session: {e}");
            return;
        }
    };

    for line in stream {
        println!("[{}] {}", line.emitted_at.format("%H:%M:%S"), line);
    }

    println!();
    match handle.wait() {
        Ok(summary) => {
            match summary.average_bpm {
                Some(avg) => println!("Average heart rate: {avg} BPM"),
                None => println!("No valid heart rate in this session"),
            }
            println!(
                "Accepted {} of {} windows, {} resets",
                summary.accepted, summary.windows, summary.resets
            );
        }
        Err(e) => eprintln!("Session failed: {e}"),
    }

    println!();
    println!("{}", counters.summary());
}
