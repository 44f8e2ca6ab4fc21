//! Vitals Sensor Agent CLI
//!
//! Measures heart rate and body temperature and prints live status lines.

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vitals_sensor_agent::{
    collector::{DriverError, DriverFactory, NoopDriver, SensorDriver, SimulatedDriver},
    config::Config,
    read_temp,
    session::VitalsSession,
    telemetry::{create_shared_counters_with_persistence, SharedCounters},
    PeakBpmEstimator, Rounding, TemperatureScale, VitalsFacade, VERSION,
};

#[derive(Parser)]
#[command(name = "vitals-sensor")]
#[command(version = VERSION)]
#[command(about = "Heart rate and temperature from low-cost sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the temperature, then stream heart rate tagged with it
    Vitals {
        /// Session length in seconds (defaults to the configured duration)
        #[arg(long)]
        duration: Option<u32>,

        /// Temperature scale (C or F)
        #[arg(long)]
        scale: Option<TemperatureScale>,

        /// Optical sensor driver
        #[arg(long, value_enum, default_value = "sim")]
        driver: DriverKind,

        /// Heart rate produced by the simulated driver
        #[arg(long, default_value = "72")]
        sim_bpm: f64,
    },

    /// Stream heart rate only
    Hr {
        /// Session length in seconds (defaults to the configured duration)
        #[arg(long)]
        duration: Option<u32>,

        /// Optical sensor driver
        #[arg(long, value_enum, default_value = "sim")]
        driver: DriverKind,

        /// Heart rate produced by the simulated driver
        #[arg(long, default_value = "72")]
        sim_bpm: f64,
    },

    /// Read the thermometer once
    Temp {
        /// Temperature scale (C or F)
        #[arg(long)]
        scale: Option<TemperatureScale>,

        /// Rounding of the Celsius value (nearest, floor, ceil)
        #[arg(long, default_value = "nearest")]
        rounding: Rounding,
    },

    /// Show cumulative session statistics
    Status {
        /// Clear the saved statistics
        #[arg(long)]
        reset: bool,
    },

    /// Show configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum DriverKind {
    /// Synthetic pulse waveform
    Sim,
    /// Driver that never produces samples
    Noop,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Vitals {
            duration,
            scale,
            driver,
            sim_bpm,
        } => {
            cmd_vitals(duration, scale, driver, sim_bpm);
        }
        Commands::Hr {
            duration,
            driver,
            sim_bpm,
        } => {
            cmd_hr(duration, driver, sim_bpm);
        }
        Commands::Temp { scale, rounding } => {
            cmd_temp(scale, rounding);
        }
        Commands::Status { reset } => {
            cmd_status(reset);
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Check {:?} or delete it to use defaults.", Config::config_path());
            std::process::exit(1);
        }
    }
}

fn open_counters(config: &Config) -> SharedCounters {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    create_shared_counters_with_persistence(config.stats_path())
}

fn driver_factory(kind: DriverKind, config: &Config, sim_bpm: f64) -> Box<dyn DriverFactory> {
    let sample_hz = config.hr.sample_hz;
    match kind {
        DriverKind::Sim => Box::new(move || -> Result<Box<dyn SensorDriver>, DriverError> {
            Ok(Box::new(SimulatedDriver::real_time(sim_bpm, sample_hz)))
        }),
        DriverKind::Noop => Box::new(|| -> Result<Box<dyn SensorDriver>, DriverError> {
            Ok(Box::new(NoopDriver::new()))
        }),
    }
}

fn session_secs(duration: Option<u32>, config: &Config) -> u32 {
    duration.unwrap_or(config.session_duration.as_secs() as u32)
}

fn save_counters(counters: &SharedCounters) {
    if let Err(e) = counters.save() {
        eprintln!("Warning: Could not save session statistics: {e}");
    }
}

fn cmd_vitals(
    duration: Option<u32>,
    scale: Option<TemperatureScale>,
    driver: DriverKind,
    sim_bpm: f64,
) {
    let config = load_config();
    let secs = session_secs(duration, &config);
    let scale = scale.unwrap_or(config.scale);
    let counters = open_counters(&config);
    let factory = driver_factory(driver, &config, sim_bpm);

    let started = VitalsFacade::new(config, factory)
        .with_counters(counters.clone())
        .start(secs, scale);
    let (handle, stream) = match started {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    for line in stream {
        println!("{line}");
    }

    let report = handle.wait();
    save_counters(&counters);
    println!(
        "{}",
        serde_json::to_string(&report).unwrap_or_else(|_| "Error".to_string())
    );
    if !report.ok {
        std::process::exit(1);
    }
}

fn cmd_hr(duration: Option<u32>, driver: DriverKind, sim_bpm: f64) {
    let config = load_config();
    let secs = session_secs(duration, &config);
    let counters = open_counters(&config);
    let factory = driver_factory(driver, &config, sim_bpm);

    let estimator = PeakBpmEstimator::with_config(config.hr.estimator.clone());
    let session = VitalsSession::new(config.hr, factory, Box::new(estimator))
        .with_counters(counters.clone());
    let (handle, stream) = match session.spawn(Duration::from_secs(u64::from(secs))) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    for line in stream {
        println!("{line}");
    }

    match handle.wait() {
        Ok(summary) => {
            save_counters(&counters);
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "Error".to_string())
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_temp(scale: Option<TemperatureScale>, rounding: Rounding) {
    let config = load_config();
    let scale = scale.unwrap_or(config.scale);

    let report = read_temp(&config.thermometer, scale, rounding);
    println!(
        "{}",
        serde_json::to_string(&report).unwrap_or_else(|_| "Error".to_string())
    );
    if !report.is_ok() {
        std::process::exit(1);
    }
}

fn cmd_status(reset: bool) {
    let config = load_config();

    println!("Vitals Sensor Agent v{VERSION}");
    println!("==========================");
    println!();

    println!("Configuration:");
    println!("  Session duration: {}s", config.session_duration.as_secs());
    println!("  Temperature scale: {}", config.scale);
    println!(
        "  Window: {}s every {}s at {} Hz ({} channel)",
        config.hr.window_secs, config.hr.step_secs, config.hr.sample_hz, config.hr.channel
    );
    println!("  Thermometer directory: {:?}", config.thermometer.base_dir);
    println!();

    let stats_path = config.stats_path();
    if reset {
        let counters = open_counters(&config);
        counters.reset();
        save_counters(&counters);
        println!("Session statistics cleared.");
        return;
    }

    if stats_path.exists() {
        let counters = create_shared_counters_with_persistence(stats_path);
        println!("{}", counters.summary());
        println!("  Counting since: {}", counters.stats().started.to_rfc3339());
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
