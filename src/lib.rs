//! BNO08x 9-DoF IMU sampling node
//!
//! Reads a BNO08x sensor hub over I2C and publishes two independently timed
//! streams: inertial messages (orientation, angular velocity, linear
//! acceleration) and, optionally, magnetic field messages. Both streams share
//! one sensor handle, so bus transactions never interleave.
//!
//! # Quick Start
//!
//! ## Running the Node
//! ```no_run
//! use std::sync::Arc;
//! use bno08x_imu_node::{open_bno08x, JsonLinesTransport, Scheduler, SensorConfig, SensorHandle};
//!
//! let config = SensorConfig {
//!     enable_magnetometer: true,
//!     magnetometer_rate_hz: 25.0,
//!     ..Default::default()
//! };
//! config.validate()?;
//!
//! let sensor = open_bno08x(&config)?;
//! let handle = Arc::new(SensorHandle::initialize(sensor, &config)?);
//! let mut scheduler = Scheduler::start(&config, handle, &JsonLinesTransport::stdout())?;
//!
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! for (stream, stats) in scheduler.shutdown() {
//!     println!("{}: {}", stream, stats);
//! }
//! # Ok::<(), bno08x_imu_node::NodeError>(())
//! ```
//!
//! ## Reading the Sensor Directly
//! ```no_run
//! use bno08x_imu_node::{open_bno08x, Feature, MotionSensor, SensorConfig};
//! use std::time::Duration;
//!
//! let config = SensorConfig::default();
//! let mut sensor = open_bno08x(&config)?;
//! sensor
//!     .enable_feature(Feature::RotationVector, Duration::from_millis(10))
//!     .map_err(bno08x_imu_node::NodeError::init)?;
//!
//! std::thread::sleep(Duration::from_millis(50));
//! let [x, y, z, w] = sensor
//!     .read_orientation()
//!     .map_err(bno08x_imu_node::NodeError::read)?;
//! println!("q = ({:.3}, {:.3}, {:.3}, {:.3})", x, y, z, w);
//! # Ok::<(), bno08x_imu_node::NodeError>(())
//! ```
//!
//! ## Consuming Messages In-Process
//! ```no_run
//! use std::sync::Arc;
//! use bno08x_imu_node::{open_bno08x, ChannelTransport, Message, Scheduler, SensorConfig, SensorHandle};
//!
//! let config = SensorConfig::default();
//! let handle = Arc::new(SensorHandle::initialize(open_bno08x(&config)?, &config)?);
//! let (transport, receiver) = ChannelTransport::bounded(64);
//! let _scheduler = Scheduler::start(&config, handle, &transport)?;
//!
//! for published in receiver.iter().take(100) {
//!     if let Message::Imu(msg) = published.message {
//!         println!("{} {:?}", msg.header.stamp, msg.linear_acceleration);
//!     }
//! }
//! # Ok::<(), bno08x_imu_node::NodeError>(())
//! ```

pub mod bno08x;
pub mod config;
pub mod error;
pub mod messages;
pub mod scheduler;
pub mod sensor;
pub mod shtp;
pub mod sink;

// Re-export public API
#[cfg(feature = "linux")]
pub use bno08x::open_bno08x;
pub use bno08x::{Bno08x, ProductId, Timeouts};
pub use config::SensorConfig;
pub use error::{NodeError, Result, SensorError};
pub use messages::{InertialMessage, MagneticFieldMessage, Message};
pub use scheduler::{Scheduler, StatsSnapshot, StopHandle, Stream};
pub use sensor::{Feature, InertialSample, MagneticSample, MotionSensor, SensorHandle};
pub use sink::{ChannelTransport, JsonLinesTransport, NullTransport, Publisher, Published, Transport};
