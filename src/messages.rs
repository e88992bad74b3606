//! Output message types and the pure builders that produce them

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sensor::{InertialSample, MagneticSample};

/// Reference frame of every measurement this node publishes
pub const FRAME_ID: &str = "imu_link";

/// Topic carrying [`InertialMessage`]
pub const INERTIAL_TOPIC: &str = "/sensor/imu/data";

/// Topic carrying [`MagneticFieldMessage`]
pub const MAGNETIC_FIELD_TOPIC: &str = "/sensor/imu/magnetic_field";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    /// Capture time of the underlying read
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

impl Header {
    fn new(stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            frame_id: FRAME_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<[f64; 3]> for Vector3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Orientation, angular velocity and linear acceleration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InertialMessage {
    pub header: Header,
    pub orientation: Quaternion,
    /// rad/s
    pub angular_velocity: Vector3,
    /// m/s²
    pub linear_acceleration: Vector3,
}

/// Magnetic field in µT
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagneticFieldMessage {
    pub header: Header,
    pub magnetic_field: Vector3,
}

/// Anything a publisher can carry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Imu(InertialMessage),
    MagneticField(MagneticFieldMessage),
}

impl From<InertialMessage> for Message {
    fn from(msg: InertialMessage) -> Self {
        Message::Imu(msg)
    }
}

impl From<MagneticFieldMessage> for Message {
    fn from(msg: MagneticFieldMessage) -> Self {
        Message::MagneticField(msg)
    }
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Imu(msg) => &msg.header,
            Message::MagneticField(msg) => &msg.header,
        }
    }
}

/// Build an inertial message from a raw sample
///
/// The quaternion is taken as (x, y, z, w) and emitted in that order. Values
/// are copied untouched: the sensor already reports SI units.
pub fn build_inertial(sample: &InertialSample, now: DateTime<Utc>) -> InertialMessage {
    let [x, y, z, w] = sample.orientation;
    InertialMessage {
        header: Header::new(now),
        orientation: Quaternion { x, y, z, w },
        angular_velocity: sample.angular_velocity.into(),
        linear_acceleration: sample.linear_acceleration.into(),
    }
}

/// Build a magnetic field message from a raw sample
pub fn build_magnetic(sample: &MagneticSample, now: DateTime<Utc>) -> MagneticFieldMessage {
    MagneticFieldMessage {
        header: Header::new(now),
        magnetic_field: sample.magnetic_field.into(),
    }
}
