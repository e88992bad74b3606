//! IMU driver node
//!
//! Brings up a BNO08x over Linux I2C and publishes inertial and magnetic
//! field messages until Ctrl+C. Messages go to stdout as JSON lines, logs go
//! to stderr.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info};

use bno08x_imu_node::config::{parse_bus_address, DEFAULT_BUS_ADDRESS, DEFAULT_I2C_DEVICE, DEFAULT_RATE_HZ};
use bno08x_imu_node::{
    open_bno08x, JsonLinesTransport, NodeError, NullTransport, Result, Scheduler, SensorConfig, SensorHandle,
    Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Sink {
    /// One JSON object per message on stdout
    Stdout,
    /// Discard messages
    Null,
}

#[derive(Parser, Debug)]
#[command(name = "imu-driver")]
#[command(about = "Publish BNO08x inertial and magnetic field data", long_about = None)]
struct Args {
    /// I2C character device
    #[arg(long, default_value = DEFAULT_I2C_DEVICE)]
    i2c_device: PathBuf,

    /// Sensor I2C address, decimal or 0x hex
    #[arg(long, value_parser = parse_bus_address, default_value_t = DEFAULT_BUS_ADDRESS)]
    bus_address: u8,

    /// Publish orientation, angular velocity and linear acceleration
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    enable_inertial: bool,

    /// Enable the magnetometer and publish the magnetic field
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    enable_magnetometer: bool,

    /// Inertial publication rate in Hz
    #[arg(long, default_value_t = DEFAULT_RATE_HZ)]
    inertial_rate_hz: f64,

    /// Magnetic field publication rate in Hz
    #[arg(long, default_value_t = DEFAULT_RATE_HZ)]
    magnetometer_rate_hz: f64,

    /// Where published messages go
    #[arg(long, value_enum, default_value_t = Sink::Stdout)]
    sink: Sink,

    /// Log per-stream statistics every N seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    stats_interval: Option<u64>,
}

impl Args {
    fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            i2c_device: self.i2c_device.clone(),
            bus_address: self.bus_address,
            enable_inertial: self.enable_inertial,
            enable_magnetometer: self.enable_magnetometer,
            inertial_rate_hz: self.inertial_rate_hz,
            magnetometer_rate_hz: self.magnetometer_rate_hz,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.sensor_config();
    config.validate()?;

    let sensor = open_bno08x(&config)?;
    let handle = Arc::new(SensorHandle::initialize(sensor, &config)?);

    let transport: Box<dyn Transport> = match args.sink {
        Sink::Stdout => Box::new(JsonLinesTransport::stdout()),
        Sink::Null => Box::new(NullTransport),
    };
    let mut scheduler = Scheduler::start(&config, handle, transport.as_ref())?;
    info!("IMU driver node initialized");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| NodeError::Startup(format!("cannot install Ctrl+C handler: {}", e)))?;

    match args.stats_interval {
        Some(secs) => loop {
            match rx.recv_timeout(Duration::from_secs(secs)) {
                Err(RecvTimeoutError::Timeout) => {
                    for stream in scheduler.streams() {
                        if let Some(stats) = scheduler.stats(stream) {
                            info!("{} stream: {}", stream, stats);
                        }
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        },
        None => {
            let _ = rx.recv();
        }
    }

    info!("Received Ctrl+C, shutting down");
    for (stream, stats) in scheduler.shutdown() {
        info!("{} stream final: {}", stream, stats);
    }
    Ok(())
}
