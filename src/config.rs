//! Node configuration
//!
//! Built once at startup from the command line, validated, then shared by
//! reference with the sensor handle and the scheduler.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{NodeError, Result};

/// Default I2C character device
pub const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-1";

/// Default BNO08x I2C address (SA0 low)
pub const DEFAULT_BUS_ADDRESS: u8 = 0x4B;

/// Default sampling rate for both streams
pub const DEFAULT_RATE_HZ: f64 = 100.0;

/// Sensor and stream configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// I2C character device the sensor hangs off
    pub i2c_device: PathBuf,
    /// 7-bit I2C address of the sensor hub
    pub bus_address: u8,
    /// Arm the inertial stream
    pub enable_inertial: bool,
    /// Enable the magnetometer feature and arm its stream
    pub enable_magnetometer: bool,
    /// Inertial publication rate in Hz
    pub inertial_rate_hz: f64,
    /// Magnetic field publication rate in Hz
    pub magnetometer_rate_hz: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_device: PathBuf::from(DEFAULT_I2C_DEVICE),
            bus_address: DEFAULT_BUS_ADDRESS,
            enable_inertial: true,
            enable_magnetometer: false,
            inertial_rate_hz: DEFAULT_RATE_HZ,
            magnetometer_rate_hz: DEFAULT_RATE_HZ,
        }
    }
}

impl SensorConfig {
    /// Check the rates of every enabled stream
    ///
    /// Rates of disabled streams are never turned into periods, so they are
    /// not checked.
    pub fn validate(&self) -> Result<()> {
        if self.enable_inertial {
            check_rate("inertial_rate_hz", self.inertial_rate_hz)?;
        }
        if self.enable_magnetometer {
            check_rate("magnetometer_rate_hz", self.magnetometer_rate_hz)?;
        }
        if self.bus_address > 0x7F {
            return Err(NodeError::Config(format!(
                "bus_address must be a 7-bit address, got 0x{:02X}",
                self.bus_address
            )));
        }
        Ok(())
    }

    /// Tick period of the inertial stream
    pub fn inertial_period(&self) -> Duration {
        period_from_rate(self.inertial_rate_hz)
    }

    /// Tick period of the magnetic field stream
    pub fn magnetometer_period(&self) -> Duration {
        period_from_rate(self.magnetometer_rate_hz)
    }
}

fn check_rate(name: &str, rate_hz: f64) -> Result<()> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(NodeError::Config(format!(
            "{} must be a positive, finite number, got {}",
            name, rate_hz
        )));
    }
    if Duration::try_from_secs_f64(1.0 / rate_hz).map_or(true, |p| p.is_zero()) {
        return Err(NodeError::Config(format!(
            "{} of {} Hz is too high to schedule",
            name, rate_hz
        )));
    }
    Ok(())
}

/// Convert a validated rate into a timer period
pub fn period_from_rate(rate_hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate_hz)
}

/// Parse an I2C address given in decimal or `0x` hex
///
/// # Example
/// ```
/// use bno08x_imu_node::config::parse_bus_address;
///
/// assert_eq!(parse_bus_address("0x4b"), Ok(0x4B));
/// assert_eq!(parse_bus_address("74"), Ok(0x4A));
/// ```
pub fn parse_bus_address(text: &str) -> std::result::Result<u8, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    let address = parsed.map_err(|e| format!("invalid I2C address '{}': {}", text, e))?;
    if address > 0x7F {
        return Err(format!("I2C address 0x{:02X} is not a 7-bit address", address));
    }
    Ok(address)
}
