//! Integration tests for combined temperature and heart-rate measurement

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use vitals_sensor_agent::collector::{
    DriverError, DriverFactory, Pacing, SensorDriver, SimulatedDriver,
};
use vitals_sensor_agent::config::{Config, HrConfig, ThermometerConfig};
use vitals_sensor_agent::session::SessionError;
use vitals_sensor_agent::{read_temp, Rounding, TemperatureScale, VitalsFacade};

fn fake_thermometer(dir: &Path, millidegrees: i64) -> ThermometerConfig {
    let device = dir.join("28-0316a2794aff");
    std::fs::create_dir_all(&device).unwrap();
    std::fs::write(
        device.join("w1_slave"),
        format!(
            "50 01 4b 46 7f ff 0c 10 1c : crc=1c YES\n50 01 4b 46 7f ff 0c 10 1c t={millidegrees}\n"
        ),
    )
    .unwrap();

    ThermometerConfig {
        base_dir: dir.to_path_buf(),
        retry_delay: Duration::from_millis(1),
        ..ThermometerConfig::default()
    }
}

fn test_config(thermometer: ThermometerConfig) -> Config {
    Config {
        hr: HrConfig {
            settle_delay: Duration::ZERO,
            fill_poll: Duration::from_millis(1),
            stream_poll: Duration::from_millis(1),
            ..HrConfig::default()
        },
        thermometer,
        ..Config::default()
    }
}

fn burst_factory() -> Box<dyn DriverFactory> {
    Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> {
        Ok(Box::new(SimulatedDriver::new(72.0, 100, Pacing::Burst(50))))
    })
}

#[test]
fn test_lines_are_tagged_with_temperature() {
    let dir = TempDir::new().unwrap();
    let config = test_config(fake_thermometer(dir.path(), 36_625));

    let (handle, stream) = VitalsFacade::new(config, burst_factory())
        .start(2, TemperatureScale::Celsius)
        .unwrap();
    assert_eq!(handle.temperature().unwrap().value, 36.6);

    let lines: Vec<String> = stream.collect();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|l| l.starts_with("TEMPC 36.6 | LIVE")));

    let report = handle.wait();
    assert!(report.ok);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["tempC"], 36.6);
    assert!(json["avg_hr"].is_u64());
    assert!(json.get("error").is_none());
}

#[test]
fn test_fahrenheit_report_uses_temp_f_key() {
    let dir = TempDir::new().unwrap();
    let config = test_config(fake_thermometer(dir.path(), 23_125));

    let (handle, stream) = VitalsFacade::new(config, burst_factory())
        .start(1, TemperatureScale::Fahrenheit)
        .unwrap();
    let first = stream.take(1).next();
    let report = handle.wait();

    if let Some(line) = first {
        assert!(line.starts_with("TEMPF 73.6 | "), "line {line}");
    }
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tempF"], 73.6);
    assert!(json.get("tempC").is_none());
}

#[test]
fn test_missing_thermometer_streams_error_then_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(ThermometerConfig {
        base_dir: dir.path().join("missing"),
        ..ThermometerConfig::default()
    });

    let (handle, stream) = VitalsFacade::new(config, burst_factory())
        .start(1, TemperatureScale::Celsius)
        .unwrap();
    assert!(handle.temperature().is_err());

    let lines: Vec<String> = stream.collect();
    assert!(lines[0].starts_with("TEMP ERROR: No DS18B20 found under"));
    assert!(lines[1..].iter().all(|l| l.starts_with("LIVE")));

    let report = handle.wait();
    assert!(!report.ok);
    assert_eq!(report.avg_hr, None);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Enable 1-Wire and check wiring"));
    assert!(json.get("avg_hr").is_none());
}

#[test]
fn test_zero_duration_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(fake_thermometer(dir.path(), 20_000));

    let result = VitalsFacade::new(config, burst_factory()).start(0, TemperatureScale::Celsius);
    assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
}

#[test]
fn test_read_temp_reports_crc_failure() {
    let dir = TempDir::new().unwrap();
    let device = dir.path().join("28-0000075b3b2c");
    std::fs::create_dir_all(&device).unwrap();
    std::fs::write(device.join("w1_slave"), "ff ff : crc=00 NO\nff ff t=85000\n").unwrap();
    let config = ThermometerConfig {
        base_dir: dir.path().to_path_buf(),
        retry_delay: Duration::from_millis(1),
        ..ThermometerConfig::default()
    };

    let report = read_temp(&config, TemperatureScale::Celsius, Rounding::Nearest);
    assert!(!report.is_ok());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["error"], "Failed to get a valid reading (CRC not YES).");
}

#[tokio::test]
async fn test_wait_async_report() {
    let dir = TempDir::new().unwrap();
    let config = test_config(fake_thermometer(dir.path(), 21_000));

    let (handle, stream) = VitalsFacade::new(config, burst_factory())
        .start(1, TemperatureScale::Celsius)
        .unwrap();
    let reader = std::thread::spawn(move || stream.count());

    let report = handle.wait_async().await;
    reader.join().unwrap();
    assert!(report.ok);
    assert_eq!(report.temperature.map(|t| t.value), Some(21.0));
}
