//! Integration tests for heart-rate sessions driven by scripted sensors

use std::io;
use std::time::{Duration, Instant};
use vitals_sensor_agent::collector::{
    DriverError, DriverFactory, NoopDriver, Pacing, SampleBatch, SensorDriver, SimulatedDriver,
};
use vitals_sensor_agent::config::HrConfig;
use vitals_sensor_agent::core::{BpmEstimator, EstimatorError, PeakBpmEstimator};
use vitals_sensor_agent::session::VitalsSession;
use vitals_sensor_agent::telemetry::create_shared_counters;

/// Defaults with the sleeps shortened so sessions run quickly.
fn fast_config() -> HrConfig {
    HrConfig {
        settle_delay: Duration::ZERO,
        fill_poll: Duration::from_millis(1),
        stream_poll: Duration::from_millis(1),
        reset_backoff: Duration::from_millis(50),
        fault_backoff: Duration::from_millis(20),
        ..HrConfig::default()
    }
}

fn noop_factory() -> Box<dyn DriverFactory> {
    Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> {
        Ok(Box::new(NoopDriver::new()))
    })
}

fn burst_factory(bpm: f64, per_poll: usize) -> Box<dyn DriverFactory> {
    Box::new(move || -> Result<Box<dyn SensorDriver>, DriverError> {
        Ok(Box::new(SimulatedDriver::new(bpm, 100, Pacing::Burst(per_poll))))
    })
}

fn peak_estimator() -> Box<dyn BpmEstimator> {
    Box::new(PeakBpmEstimator::new())
}

/// Opens fine, then fails every read with a bus error.
struct FaultingDriver;

impl SensorDriver for FaultingDriver {
    fn reset(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn read_sequential(&mut self) -> Result<SampleBatch, DriverError> {
        Err(DriverError::Bus(io::Error::other("Remote I/O error")))
    }
}

/// Delivers a clean pulse for a number of polls, then loses the bus for good.
struct FailsAfterDriver {
    pulse: SimulatedDriver,
    good_polls: usize,
}

impl SensorDriver for FailsAfterDriver {
    fn reset(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn read_sequential(&mut self) -> Result<SampleBatch, DriverError> {
        if self.good_polls == 0 {
            return Err(DriverError::Bus(io::Error::other("nack")));
        }
        self.good_polls -= 1;
        self.pulse.read_sequential()
    }
}

struct PanickingEstimator;

impl BpmEstimator for PanickingEstimator {
    fn estimate(&self, _signal: &[f64], _sample_hz: f64) -> Result<f64, EstimatorError> {
        panic!("estimator exploded")
    }
}

struct NoisyEstimator;

impl BpmEstimator for NoisyEstimator {
    fn estimate(&self, _signal: &[f64], _sample_hz: f64) -> Result<f64, EstimatorError> {
        Err(EstimatorError::Noisy)
    }
}

#[test]
fn test_empty_driver_ends_at_deadline_without_average() {
    let session = VitalsSession::new(fast_config(), noop_factory(), peak_estimator());

    let started = Instant::now();
    let (handle, stream) = session.spawn(Duration::from_secs(1)).unwrap();
    let lines: Vec<_> = stream.collect();
    let summary = handle.wait().unwrap();

    assert!(lines.is_empty());
    assert_eq!(summary.average_bpm, None);
    assert_eq!(summary.windows, 0);
    assert!(!summary.ended_early);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_persistent_bus_faults_exhaust_reset_budget() {
    let factory: Box<dyn DriverFactory> =
        Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> { Ok(Box::new(FaultingDriver)) });
    let session = VitalsSession::new(fast_config(), factory, peak_estimator());

    let started = Instant::now();
    let (handle, stream) = session.spawn(Duration::from_secs(10)).unwrap();
    let lines: Vec<_> = stream.map(|m| m.text).collect();
    let summary = handle.wait().unwrap();

    let resets = lines.iter().filter(|l| l.starts_with("I2C error")).count();
    assert_eq!(resets, 4);
    assert!(lines[0].contains("Remote I/O error"));
    assert!(summary.ended_early);
    assert_eq!(summary.resets, 4);
    assert_eq!(summary.average_bpm, None);
    // Three backoffs, nowhere near the configured duration
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_average_survives_faults_after_accepted_windows() {
    let config = fast_config();
    let max_resets = config.max_resets;
    // Only the first driver works; every reinitialized one faults immediately
    let mut opened = 0;
    let factory: Box<dyn DriverFactory> =
        Box::new(move || -> Result<Box<dyn SensorDriver>, DriverError> {
            opened += 1;
            let good_polls = if opened == 1 { 200 } else { 0 };
            Ok(Box::new(FailsAfterDriver {
                pulse: SimulatedDriver::new(72.0, 100, Pacing::Burst(25)),
                good_polls,
            }))
        });
    let session = VitalsSession::new(config, factory, peak_estimator());

    let started = Instant::now();
    let (handle, stream) = session.spawn(Duration::from_secs(10)).unwrap();
    let lines: Vec<_> = stream.map(|m| m.text).collect();
    let summary = handle.wait().unwrap();

    assert!(summary.ended_early);
    assert_eq!(summary.resets, max_resets + 1);
    assert!(summary.accepted > 0);
    let average = summary.average_bpm.expect("windows before the faults were accepted");
    assert!((66..=78).contains(&average), "average {average}");

    assert!(lines.iter().any(|l| l.starts_with("LIVE")));
    assert_eq!(lines.last().unwrap(), "I2C error: nack. Reinitializing…");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_init_bus_faults_share_the_reset_budget() {
    let factory: Box<dyn DriverFactory> =
        Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> {
            Err(DriverError::Bus(io::Error::new(
                io::ErrorKind::NotFound,
                "No such device",
            )))
        });
    let config = HrConfig {
        max_resets: 1,
        ..fast_config()
    };
    let session = VitalsSession::new(config, factory, peak_estimator());

    let (handle, stream) = session.spawn(Duration::from_secs(10)).unwrap();
    let lines: Vec<_> = stream.map(|m| m.text).collect();
    let summary = handle.wait().unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("I2C error: No such device")));
    assert!(summary.ended_early);
}

#[test]
fn test_synthetic_pulse_averages_near_true_rate() {
    let counters = create_shared_counters();
    let session = VitalsSession::new(fast_config(), burst_factory(72.0, 25), peak_estimator())
        .with_counters(counters.clone());

    let (handle, stream) = session.spawn(Duration::from_secs(3)).unwrap();
    let lines: Vec<_> = stream.collect();
    let summary = handle.wait().unwrap();

    assert!(!lines.is_empty());
    assert!(lines.iter().all(|l| l.text.starts_with("LIVE")));
    assert!(summary.windows > 0);
    assert!(summary.accepted as u64 <= summary.windows);

    let average = summary.average_bpm.expect("clean signal should produce an average");
    assert!((66..=78).contains(&average), "average {average}");

    let last = lines.iter().rev().find_map(|l| l.bpm_value()).unwrap();
    assert!((66..=78).contains(&last), "last live value {last}");

    let stats = counters.stats();
    assert_eq!(stats.windows_processed, summary.windows);
    assert_eq!(stats.sessions_completed, 1);
}

#[test]
fn test_rejected_windows_stream_without_average() {
    let session = VitalsSession::new(
        fast_config(),
        burst_factory(72.0, 50),
        Box::new(NoisyEstimator),
    );

    let (handle, stream) = session.spawn(Duration::from_secs(1)).unwrap();
    let lines: Vec<_> = stream.map(|m| m.text).collect();
    let summary = handle.wait().unwrap();

    assert!(!lines.is_empty());
    assert!(lines.iter().all(|l| l == "LIVE  --  (noisy / adjust finger)"));
    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.average_bpm, None);
}

#[test]
fn test_estimator_panic_is_reported_and_retried() {
    let session = VitalsSession::new(
        fast_config(),
        burst_factory(72.0, 100),
        Box::new(PanickingEstimator),
    );

    let (handle, stream) = session.spawn(Duration::from_secs(1)).unwrap();
    let lines: Vec<_> = stream.map(|m| m.text).collect();
    let summary = handle.wait().unwrap();

    assert!(lines.len() >= 2);
    assert!(lines
        .iter()
        .all(|l| l == "Unexpected error: estimator exploded"));
    assert_eq!(summary.resets, 0);
    assert!(!summary.ended_early);
    assert_eq!(summary.average_bpm, None);
}

#[test]
fn test_slow_consumer_drops_lines_but_stream_terminates() {
    let config = HrConfig {
        live_capacity: 2,
        ..fast_config()
    };
    let counters = create_shared_counters();
    let session = VitalsSession::new(config, burst_factory(72.0, 100), peak_estimator())
        .with_counters(counters.clone());

    let (handle, stream) = session.spawn(Duration::from_secs(1)).unwrap();
    // Nobody reads until the session is over
    let summary = handle.wait().unwrap();
    let delivered = stream.count();

    assert!(summary.messages_dropped > 0);
    assert!(delivered <= 2);
    assert_eq!(
        delivered as u64 + summary.messages_dropped,
        summary.windows
    );
    assert_eq!(counters.stats().messages_dropped, summary.messages_dropped);
}

#[test]
fn test_session_id_matches_summary() {
    let session = VitalsSession::new(fast_config(), noop_factory(), peak_estimator());
    let (handle, stream) = session.spawn(Duration::from_millis(100)).unwrap();
    let id = handle.session_id();

    drop(stream);
    let summary = handle.wait().unwrap();
    assert_eq!(summary.session_id, id);
}

#[tokio::test]
async fn test_wait_async_resolves_after_stream_ends() {
    let session = VitalsSession::new(fast_config(), burst_factory(72.0, 50), peak_estimator());
    let (handle, stream) = session.spawn(Duration::from_secs(1)).unwrap();

    let reader = std::thread::spawn(move || stream.count());
    let summary = handle.wait_async().await.unwrap();
    let delivered = reader.join().unwrap();

    assert!(delivered > 0);
    assert!(summary.finished_at >= summary.started_at);
}
