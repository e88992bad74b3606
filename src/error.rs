//! Error types for the IMU node

use thiserror::Error;

use crate::sensor::Feature;

/// Errors raised by a motion sensor driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// I2C transaction failed
    #[error("I2C bus error: {0}")]
    Bus(String),

    /// The device did not answer in time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// No report for the feature has arrived yet
    #[error("no {0} report received yet")]
    NoData(Feature),

    /// Set Feature command was not acknowledged
    #[error("device did not acknowledge {0} feature")]
    FeatureNotAcknowledged(Feature),

    /// Product ID response missing after reset
    #[error("no product ID response from sensor hub")]
    ProductIdMissing,

    /// The sensor has already been released
    #[error("sensor has been released")]
    Released,
}

/// Error type for node operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Bus open, reset or feature enablement failed
    #[error("Device initialization failed: {0}")]
    DeviceInit(String),

    /// A read on the hot path failed
    #[error("Device read failed: {0}")]
    DeviceRead(String),

    /// The sink rejected a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A stream thread could not be started
    #[error("Startup failed: {0}")]
    Startup(String),
}

impl NodeError {
    /// Wrap a driver error raised while bringing the device up
    pub fn init(err: SensorError) -> Self {
        NodeError::DeviceInit(err.to_string())
    }

    /// Wrap a driver error raised while sampling
    pub fn read(err: SensorError) -> Self {
        NodeError::DeviceRead(err.to_string())
    }

    /// Whether the error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::Config(_) | NodeError::DeviceInit(_) | NodeError::Startup(_)
        )
    }
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;
