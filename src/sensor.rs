//! Sensor handle: exclusive, serialized access to the motion sensor

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};

use crate::config::SensorConfig;
use crate::error::{NodeError, Result, SensorError};
use crate::shtp;

/// On-device report used by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Calibrated linear acceleration including gravity (m/s²)
    Accelerometer,
    /// Calibrated angular velocity (rad/s)
    Gyroscope,
    /// Calibrated magnetic field (µT)
    MagneticField,
    /// Fused orientation quaternion
    RotationVector,
}

impl Feature {
    /// All features, in report id order
    pub const ALL: [Feature; 4] = [
        Feature::Accelerometer,
        Feature::Gyroscope,
        Feature::MagneticField,
        Feature::RotationVector,
    ];

    /// SH-2 input report id
    pub fn report_id(self) -> u8 {
        match self {
            Feature::Accelerometer => shtp::REPORT_ACCELEROMETER,
            Feature::Gyroscope => shtp::REPORT_GYROSCOPE,
            Feature::MagneticField => shtp::REPORT_MAGNETIC_FIELD,
            Feature::RotationVector => shtp::REPORT_ROTATION_VECTOR,
        }
    }

    /// Look up a feature by report id
    pub fn from_report_id(report_id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.report_id() == report_id)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Accelerometer => "accelerometer",
            Feature::Gyroscope => "gyroscope",
            Feature::MagneticField => "magnetic field",
            Feature::RotationVector => "rotation vector",
        };
        f.write_str(name)
    }
}

/// Set of enabled features
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet(u8);

impl FeatureSet {
    /// Add a feature to the set
    pub fn insert(&mut self, feature: Feature) {
        self.0 |= feature.bit();
    }

    /// Take a feature out of the set, returning whether it was present
    pub fn remove(&mut self, feature: Feature) -> bool {
        let present = self.contains(feature);
        self.0 &= !feature.bit();
        present
    }

    /// Whether the feature is in the set
    pub fn contains(&self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    /// Whether no feature is in the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Capability set of a 9-DoF motion sensor
///
/// Every accessor performs bus I/O and returns the freshest value the
/// device has produced.
pub trait MotionSensor {
    /// Turn on a report with the given update interval
    fn enable_feature(&mut self, feature: Feature, interval: Duration) -> std::result::Result<(), SensorError>;

    /// Linear acceleration `[x, y, z]` in m/s²
    fn read_acceleration(&mut self) -> std::result::Result<[f64; 3], SensorError>;

    /// Angular velocity `[x, y, z]` in rad/s
    fn read_angular_velocity(&mut self) -> std::result::Result<[f64; 3], SensorError>;

    /// Orientation quaternion `[x, y, z, w]`
    fn read_orientation(&mut self) -> std::result::Result<[f64; 4], SensorError>;

    /// Magnetic field `[x, y, z]` in µT
    fn read_magnetic_field(&mut self) -> std::result::Result<[f64; 3], SensorError>;
}

/// Snapshot for the inertial stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    pub linear_acceleration: [f64; 3],
    pub angular_velocity: [f64; 3],
    /// Quaternion in (x, y, z, w) order
    pub orientation: [f64; 4],
}

/// Snapshot for the magnetic field stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagneticSample {
    pub magnetic_field: [f64; 3],
}

/// Report interval used for features whose stream is not armed
const IDLE_REPORT_INTERVAL: Duration = Duration::from_millis(50);

struct Inner<S> {
    sensor: Option<S>,
    enabled: FeatureSet,
}

/// Owns the sensor and serializes every bus transaction
///
/// Shared between the stream threads behind an `Arc`. All reads take the
/// same lock, so two streams never interleave transactions on the bus.
pub struct SensorHandle<S> {
    inner: Mutex<Inner<S>>,
}

impl<S: MotionSensor> SensorHandle<S> {
    /// Enable the features the configuration needs and take ownership
    ///
    /// Acceleration, angular velocity and rotation vector are always
    /// enabled. The magnetic field is enabled only when the magnetometer
    /// stream is. An invalid configuration is rejected before the sensor is
    /// touched. Any failure is fatal and the sensor is dropped.
    pub fn initialize(mut sensor: S, config: &SensorConfig) -> Result<Self> {
        config.validate()?;

        let inertial_interval = if config.enable_inertial {
            config.inertial_period()
        } else {
            IDLE_REPORT_INTERVAL
        };

        let mut enabled = FeatureSet::default();
        for feature in [Feature::Accelerometer, Feature::Gyroscope, Feature::RotationVector] {
            sensor
                .enable_feature(feature, inertial_interval)
                .map_err(NodeError::init)?;
            debug!("Enabled {} report every {:?}", feature, inertial_interval);
            enabled.insert(feature);
        }

        if config.enable_magnetometer {
            info!("Enabling magnetometer");
            sensor
                .enable_feature(Feature::MagneticField, config.magnetometer_period())
                .map_err(NodeError::init)?;
            enabled.insert(Feature::MagneticField);
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                sensor: Some(sensor),
                enabled,
            }),
        })
    }

    /// Read acceleration, angular velocity and orientation in one critical section
    pub fn read_inertial(&self) -> Result<InertialSample> {
        let mut inner = self.lock();
        let sensor = inner.sensor.as_mut().ok_or_else(released)?;

        let linear_acceleration = sensor.read_acceleration().map_err(NodeError::read)?;
        let angular_velocity = sensor.read_angular_velocity().map_err(NodeError::read)?;
        let orientation = sensor.read_orientation().map_err(NodeError::read)?;

        Ok(InertialSample {
            linear_acceleration,
            angular_velocity,
            orientation,
        })
    }

    /// Read the magnetic field
    ///
    /// Only valid when the magnetometer was enabled at initialization; the
    /// scheduler never arms the magnetometer stream otherwise.
    pub fn read_magnetic(&self) -> Result<MagneticSample> {
        let mut inner = self.lock();
        debug_assert!(
            inner.enabled.contains(Feature::MagneticField),
            "magnetic field read without the feature enabled"
        );
        let sensor = inner.sensor.as_mut().ok_or_else(released)?;
        let magnetic_field = sensor.read_magnetic_field().map_err(NodeError::read)?;
        Ok(MagneticSample { magnetic_field })
    }

    /// Features enabled at initialization
    pub fn enabled_features(&self) -> FeatureSet {
        self.lock().enabled
    }

    /// Drop the sensor and free the bus
    ///
    /// Returns `true` for the call that actually released it. Waits for any
    /// in-flight read to finish first.
    pub fn release(&self) -> bool {
        let mut inner = self.lock();
        let released = inner.sensor.take().is_some();
        if released {
            info!("Sensor released");
        }
        released
    }

    /// Whether the sensor is still held
    pub fn is_open(&self) -> bool {
        self.lock().sensor.is_some()
    }

    /// Lock the sensor, recovering from a panic in another stream's read
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn released() -> NodeError {
    NodeError::read(SensorError::Released)
}
