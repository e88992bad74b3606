//! Common test utilities and mock implementations

pub mod mock_sensor;

pub use mock_sensor::MockSensor;
