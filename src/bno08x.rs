//! BNO08x sensor hub driver over I2C
//!
//! Talks SHTP to a BNO080/BNO085/BNO086 on any `embedded_hal::i2c::I2c` bus.
//! The hub pushes input reports at the interval requested per feature; every
//! accessor drains whatever the hub has queued and returns the newest value.

use std::time::{Duration, Instant};

use embedded_hal::i2c::I2c;
use log::{debug, trace, warn};

use crate::error::SensorError;
use crate::sensor::{Feature, FeatureSet, MotionSensor};
use crate::shtp::{self, Header, HEADER_LEN, NUM_CHANNELS, RECV_BUF_LEN, SEND_BUF_LEN};

/// Upper bound of packets consumed by one read accessor
const MAX_PACKETS_PER_DRAIN: usize = 32;

/// Pause between polls while waiting for the hub
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the driver waits on the hub during bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed for start-up traffic after a soft reset
    pub reset_settle: Duration,
    /// Time allowed for the product ID response
    pub product_id: Duration,
    /// Time allowed for a Set Feature acknowledgement
    pub feature_ack: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reset_settle: Duration::from_millis(1000),
            product_id: Duration::from_millis(1000),
            feature_ack: Duration::from_millis(2000),
        }
    }
}

/// Identification returned by the hub after reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductId {
    pub reset_cause: u8,
    pub sw_major: u8,
    pub sw_minor: u8,
    pub part_number: u32,
    pub build: u32,
    pub patch: u16,
}

impl ProductId {
    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 14 {
            return None;
        }
        Some(Self {
            reset_cause: payload[1],
            sw_major: payload[2],
            sw_minor: payload[3],
            part_number: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            build: u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
            patch: u16::from_le_bytes([payload[12], payload[13]]),
        })
    }
}

/// Newest value of every report the node consumes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Readings {
    acceleration: Option<[f64; 3]>,
    angular_velocity: Option<[f64; 3]>,
    magnetic_field: Option<[f64; 3]>,
    /// (i, j, k, real)
    orientation: Option<[f64; 4]>,
    /// Heading accuracy estimate in radians
    orientation_accuracy: f64,
    /// Features with a report that no accessor has returned yet
    fresh: FeatureSet,
}

/// BNO08x driver
pub struct Bno08x<I2C> {
    i2c: I2C,
    address: u8,
    timeouts: Timeouts,
    /// Outgoing sequence number per channel
    sequence: [u8; NUM_CHANNELS],
    recv_buf: [u8; RECV_BUF_LEN],
    readings: Readings,
    acknowledged: FeatureSet,
    product_id: Option<ProductId>,
    reset_complete: bool,
}

impl<I2C: I2c> Bno08x<I2C> {
    /// Wrap a bus; no I/O happens until [`Bno08x::init`]
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self::with_timeouts(i2c, address, Timeouts::default())
    }

    /// Wrap a bus with custom bring-up timeouts
    pub fn with_timeouts(i2c: I2C, address: u8, timeouts: Timeouts) -> Self {
        Self {
            i2c,
            address,
            timeouts,
            sequence: [0; NUM_CHANNELS],
            recv_buf: [0; RECV_BUF_LEN],
            readings: Readings::default(),
            acknowledged: FeatureSet::default(),
            product_id: None,
            reset_complete: false,
        }
    }

    /// Reset the hub and verify it answers with a product ID
    ///
    /// The hub starts with every report disabled, so features must be
    /// enabled afterwards.
    pub fn init(&mut self) -> Result<ProductId, SensorError> {
        trace!("driver init at 0x{:02X}", self.address);
        self.soft_reset()?;
        self.verify_product_id()
    }

    /// Send a reset to the executable channel and drain start-up traffic
    pub fn soft_reset(&mut self) -> Result<(), SensorError> {
        self.reset_complete = false;
        self.send_packet(shtp::CHANNEL_EXECUTABLE, &[shtp::EXECUTABLE_CMD_RESET])?;

        // The hub NACKs while rebooting, then sends its advertisement and a
        // reset-complete notice. Stop at the first empty read after traffic.
        let deadline = Instant::now() + self.timeouts.reset_settle;
        let mut seen_traffic = false;
        while Instant::now() < deadline {
            match self.receive_packet() {
                Ok(Some(len)) => {
                    seen_traffic = true;
                    self.handle_packet(len);
                }
                Ok(None) if seen_traffic => break,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    trace!("hub not ready after reset: {}", e);
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        debug!(
            "Soft reset done (traffic: {}, reset complete: {})",
            seen_traffic, self.reset_complete
        );
        Ok(())
    }

    fn verify_product_id(&mut self) -> Result<ProductId, SensorError> {
        self.product_id = None;
        self.send_packet(shtp::CHANNEL_HUB_CONTROL, &[shtp::SHUB_PROD_ID_REQ, 0])?;

        let timeout = self.timeouts.product_id;
        self.wait_for(timeout, |driver| driver.product_id.is_some());
        let product_id = self.product_id.ok_or(SensorError::ProductIdMissing)?;
        debug!(
            "Product ID: part {} v{}.{}.{} build {}",
            product_id.part_number, product_id.sw_major, product_id.sw_minor, product_id.patch, product_id.build
        );
        Ok(product_id)
    }

    /// Product ID reported during [`Bno08x::init`]
    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    /// Accuracy estimate of the last rotation vector, in radians
    pub fn orientation_accuracy(&self) -> f64 {
        self.readings.orientation_accuracy
    }

    /// Release the bus
    pub fn free(self) -> I2C {
        self.i2c
    }

    /// Build the 17-byte Set Feature command
    fn set_feature_command(feature: Feature, interval: Duration) -> [u8; 17] {
        let micros = u32::try_from(interval.as_micros()).unwrap_or(u32::MAX);
        let [i0, i1, i2, i3] = micros.to_le_bytes();
        [
            shtp::SHUB_SET_FEATURE_CMD,
            feature.report_id(),
            0, // feature flags
            0, // change sensitivity LSB
            0, // change sensitivity MSB
            i0, // report interval, microseconds
            i1,
            i2,
            i3,
            0, // batch interval
            0,
            0,
            0,
            0, // sensor-specific config
            0,
            0,
            0,
        ]
    }

    /// Poll the bus until `done` holds or `timeout` passes
    fn wait_for(&mut self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            match self.receive_packet() {
                Ok(Some(len)) => self.handle_packet(len),
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    trace!("poll error: {}", e);
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Consume queued packets so the readings are current
    fn drain(&mut self) -> Result<(), SensorError> {
        for _ in 0..MAX_PACKETS_PER_DRAIN {
            match self.receive_packet()? {
                Some(len) => self.handle_packet(len),
                None => break,
            }
        }
        Ok(())
    }

    /// Drain the bus and return the newest value of `feature`
    ///
    /// A hub that has not produced a new report since the previous call
    /// yields the previous value again.
    fn latest<T>(&mut self, feature: Feature, value: impl Fn(&Readings) -> Option<T>) -> Result<T, SensorError> {
        self.drain()?;
        let latest = value(&self.readings).ok_or(SensorError::NoData(feature))?;
        if !self.readings.fresh.remove(feature) {
            debug!("No new {} report since the last read, reusing previous value", feature);
        }
        Ok(latest)
    }

    fn send_packet(&mut self, channel: u8, body: &[u8]) -> Result<(), SensorError> {
        let length = HEADER_LEN + body.len();
        debug_assert!(length <= SEND_BUF_LEN);

        let seq = &mut self.sequence[usize::from(channel)];
        let header = Header::encode(length, channel, *seq);
        *seq = seq.wrapping_add(1);

        let mut buf = [0u8; SEND_BUF_LEN];
        buf[..HEADER_LEN].copy_from_slice(&header);
        buf[HEADER_LEN..length].copy_from_slice(body);

        self.i2c.write(self.address, &buf[..length]).map_err(bus_error)
    }

    /// Read one packet into the receive buffer
    ///
    /// Returns the packet length, or `None` when the hub has nothing queued.
    fn receive_packet(&mut self) -> Result<Option<usize>, SensorError> {
        let mut header = [0u8; HEADER_LEN];
        self.i2c.read(self.address, &mut header).map_err(bus_error)?;
        let Some(announced) = Header::parse(&header) else {
            return Ok(None);
        };

        if announced.length > RECV_BUF_LEN {
            warn!(
                "Packet length {} exceeds receive buffer of {}, truncating",
                announced.length, RECV_BUF_LEN
            );
        }
        let len = announced.length.min(RECV_BUF_LEN);
        if len < HEADER_LEN {
            return Ok(None);
        }

        // The hub repeats the header at the start of every read
        self.i2c
            .read(self.address, &mut self.recv_buf[..len])
            .map_err(bus_error)?;
        let mut repeated = [0u8; HEADER_LEN];
        repeated.copy_from_slice(&self.recv_buf[..HEADER_LEN]);
        let Some(header) = Header::parse(&repeated) else {
            return Ok(None);
        };
        if header.continuation {
            trace!("continuation fragment on channel {}", header.channel);
        }
        let len = len.min(header.length);
        if len < HEADER_LEN {
            return Err(SensorError::Bus(format!(
                "repeated header announces {} bytes, shorter than the header",
                header.length
            )));
        }
        Ok(Some(len))
    }

    fn handle_packet(&mut self, len: usize) {
        let channel = self.recv_buf[2];
        let payload = &self.recv_buf[HEADER_LEN..len];
        if payload.is_empty() {
            return;
        }

        match channel {
            shtp::CHANNEL_COMMAND => trace!("advertisement ({} bytes)", payload.len()),
            shtp::CHANNEL_EXECUTABLE => {
                if payload[0] == shtp::EXECUTABLE_RESP_RESET_COMPLETE {
                    self.reset_complete = true;
                }
            }
            shtp::CHANNEL_HUB_CONTROL => match payload[0] {
                shtp::SHUB_PROD_ID_RESP => self.product_id = ProductId::parse(payload),
                shtp::SHUB_GET_FEATURE_RESP if payload.len() >= 2 => {
                    match Feature::from_report_id(payload[1]) {
                        Some(feature) => {
                            trace!("feature response: {}", feature);
                            self.acknowledged.insert(feature);
                        }
                        None => trace!("feature response for report 0x{:02X}", payload[1]),
                    }
                }
                shtp::SHUB_COMMAND_RESP => trace!("command response {:02X?}", payload),
                other => trace!("unhandled hub control report 0x{:02X}", other),
            },
            shtp::CHANNEL_SENSOR_REPORTS | shtp::CHANNEL_WAKE_REPORTS => {
                parse_input_reports(payload, &mut self.readings)
            }
            shtp::CHANNEL_GYRO_ROTATION => trace!("gyro-integrated rotation vector ignored"),
            other => trace!("packet on unknown channel {}", other),
        }
    }
}

/// Decode a batch of input reports into `readings`
///
/// Parsing stops at the first report id whose length is unknown, because
/// there is no way to find the next report boundary.
fn parse_input_reports(payload: &[u8], readings: &mut Readings) {
    let mut cursor = 0;
    while cursor < payload.len() {
        let report_id = payload[cursor];
        let Some(size) = shtp::report_len(report_id) else {
            trace!("unknown report 0x{:02X}, dropping rest of packet", report_id);
            break;
        };
        if cursor + size > payload.len() {
            trace!("truncated report 0x{:02X}", report_id);
            break;
        }
        let report = &payload[cursor..cursor + size];

        match report_id {
            shtp::REPORT_ACCELEROMETER => {
                readings.acceleration = Some(vector3(report, report_id));
                readings.fresh.insert(Feature::Accelerometer);
            }
            shtp::REPORT_GYROSCOPE => {
                readings.angular_velocity = Some(vector3(report, report_id));
                readings.fresh.insert(Feature::Gyroscope);
            }
            shtp::REPORT_MAGNETIC_FIELD => {
                readings.magnetic_field = Some(vector3(report, report_id));
                readings.fresh.insert(Feature::MagneticField);
            }
            shtp::REPORT_ROTATION_VECTOR => {
                let q = shtp::ROTATION_VECTOR_Q_POINT;
                readings.orientation = Some([
                    shtp::q_to_f64(shtp::read_i16(report, 4), q),
                    shtp::q_to_f64(shtp::read_i16(report, 6), q),
                    shtp::q_to_f64(shtp::read_i16(report, 8), q),
                    shtp::q_to_f64(shtp::read_i16(report, 10), q),
                ]);
                readings.orientation_accuracy =
                    shtp::q_to_f64(shtp::read_i16(report, 12), shtp::ROTATION_ACCURACY_Q_POINT);
                readings.fresh.insert(Feature::RotationVector);
            }
            _ => {} // timestamps
        }
        cursor += size;
    }
}

fn vector3(report: &[u8], report_id: u8) -> [f64; 3] {
    let q = shtp::q_point(report_id).unwrap_or(0);
    [
        shtp::q_to_f64(shtp::read_i16(report, 4), q),
        shtp::q_to_f64(shtp::read_i16(report, 6), q),
        shtp::q_to_f64(shtp::read_i16(report, 8), q),
    ]
}

fn bus_error<E: embedded_hal::i2c::Error>(err: E) -> SensorError {
    SensorError::Bus(format!("{:?}", err.kind()))
}

impl<I2C: I2c> MotionSensor for Bno08x<I2C> {
    fn enable_feature(&mut self, feature: Feature, interval: Duration) -> Result<(), SensorError> {
        trace!("enable {} every {:?}", feature, interval);
        let command = Self::set_feature_command(feature, interval);
        self.send_packet(shtp::CHANNEL_HUB_CONTROL, &command)?;

        let timeout = self.timeouts.feature_ack;
        if self.wait_for(timeout, |driver| driver.acknowledged.contains(feature)) {
            Ok(())
        } else {
            Err(SensorError::FeatureNotAcknowledged(feature))
        }
    }

    fn read_acceleration(&mut self) -> Result<[f64; 3], SensorError> {
        self.latest(Feature::Accelerometer, |r| r.acceleration)
    }

    fn read_angular_velocity(&mut self) -> Result<[f64; 3], SensorError> {
        self.latest(Feature::Gyroscope, |r| r.angular_velocity)
    }

    fn read_orientation(&mut self) -> Result<[f64; 4], SensorError> {
        self.latest(Feature::RotationVector, |r| r.orientation)
    }

    fn read_magnetic_field(&mut self) -> Result<[f64; 3], SensorError> {
        self.latest(Feature::MagneticField, |r| r.magnetic_field)
    }
}

#[cfg(feature = "linux")]
mod linux {
    use linux_embedded_hal::I2cdev;
    use log::info;

    use super::Bno08x;
    use crate::config::SensorConfig;
    use crate::error::{NodeError, Result};

    /// Open the configured I2C device and bring the hub up
    pub fn open_bno08x(config: &SensorConfig) -> Result<Bno08x<I2cdev>> {
        let i2c = I2cdev::new(&config.i2c_device).map_err(|e| {
            NodeError::DeviceInit(format!("cannot open {}: {}", config.i2c_device.display(), e))
        })?;

        let mut driver = Bno08x::new(i2c, config.bus_address);
        let product_id = driver.init().map_err(NodeError::init)?;
        info!(
            "BNO08x sensor initialized at 0x{:02X} on {} (part {}, firmware {}.{}.{})",
            config.bus_address,
            config.i2c_device.display(),
            product_id.part_number,
            product_id.sw_major,
            product_id.sw_minor,
            product_id.patch
        );
        Ok(driver)
    }
}

#[cfg(feature = "linux")]
pub use linux::open_bno08x;

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
    use std::collections::VecDeque;

    #[derive(Debug)]
    struct MockError;

    impl embedded_hal::i2c::Error for MockError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        }
    }

    enum Reply {
        Packet(Vec<u8>),
        /// Header read and full read disagree: `(announced, repeated)`
        Garbled(Vec<u8>, Vec<u8>),
        Empty,
        Nack,
    }

    /// Scripted hub: serves queued packets header-first, records writes
    #[derive(Default)]
    struct MockI2c {
        replies: VecDeque<Reply>,
        header_served: bool,
        writes: Vec<Vec<u8>>,
    }

    impl MockI2c {
        fn with(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into(),
                ..Default::default()
            }
        }

        fn read_into(&mut self, buf: &mut [u8]) -> Result<(), MockError> {
            buf.fill(0);
            match self.replies.front() {
                None => Ok(()),
                Some(Reply::Empty) => {
                    self.replies.pop_front();
                    Ok(())
                }
                Some(Reply::Nack) => {
                    self.replies.pop_front();
                    Err(MockError)
                }
                Some(Reply::Packet(bytes)) | Some(Reply::Garbled(bytes, _)) if !self.header_served => {
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    self.header_served = true;
                    Ok(())
                }
                Some(Reply::Packet(bytes)) | Some(Reply::Garbled(_, bytes)) => {
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    self.replies.pop_front();
                    self.header_served = false;
                    Ok(())
                }
            }
        }
    }

    impl ErrorType for MockI2c {
        type Error = MockError;
    }

    impl I2c for MockI2c {
        fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), MockError> {
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push(bytes.to_vec()),
                    Operation::Read(buf) => self.read_into(buf)?,
                }
            }
            Ok(())
        }
    }

    fn packet(channel: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Header::encode(HEADER_LEN + payload.len(), channel, 0).to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn report(report_id: u8, values: &[i16]) -> Vec<u8> {
        let mut bytes = vec![report_id, 0, 0x03, 0];
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    fn sensor_packet(reports: &[Vec<u8>]) -> Reply {
        let mut payload = vec![shtp::REPORT_BASE_TIMESTAMP, 0, 0, 0, 0];
        for r in reports {
            payload.extend_from_slice(r);
        }
        Reply::Packet(packet(shtp::CHANNEL_SENSOR_REPORTS, &payload))
    }

    fn feature_ack(report_id: u8) -> Reply {
        let mut payload = vec![shtp::SHUB_GET_FEATURE_RESP, report_id];
        payload.extend_from_slice(&[0; 15]);
        Reply::Packet(packet(shtp::CHANNEL_HUB_CONTROL, &payload))
    }

    fn product_id_response() -> Reply {
        let payload = [
            shtp::SHUB_PROD_ID_RESP, 0x01, 3, 2, // reset cause, version 3.2
            0x5C, 0x4F, 0x96, 0x00, // part number 9850716
            0x07, 0x01, 0x00, 0x00, // build 263
            0x04, 0x00, // patch 4
            0, 0,
        ];
        Reply::Packet(packet(shtp::CHANNEL_HUB_CONTROL, &payload))
    }

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            reset_settle: Duration::from_millis(20),
            product_id: Duration::from_millis(20),
            feature_ack: Duration::from_millis(20),
        }
    }

    fn driver(replies: Vec<Reply>) -> Bno08x<MockI2c> {
        Bno08x::with_timeouts(MockI2c::with(replies), 0x4B, fast_timeouts())
    }

    #[test]
    fn test_init_handshake() {
        let mut imu = driver(vec![
            Reply::Nack, // still booting
            Reply::Packet(packet(shtp::CHANNEL_COMMAND, &[0x00, 0x01, 0x02])),
            Reply::Packet(packet(shtp::CHANNEL_EXECUTABLE, &[shtp::EXECUTABLE_RESP_RESET_COMPLETE])),
            Reply::Empty,
            product_id_response(),
        ]);

        let product_id = imu.init().unwrap();
        assert_eq!(product_id.sw_major, 3);
        assert_eq!(product_id.sw_minor, 2);
        assert_eq!(product_id.part_number, 9_850_716);
        assert_eq!(product_id.build, 263);
        assert_eq!(product_id.patch, 4);
        assert!(imu.reset_complete);

        let writes = &imu.i2c.writes;
        assert_eq!(writes[0], vec![5, 0, shtp::CHANNEL_EXECUTABLE, 0, shtp::EXECUTABLE_CMD_RESET]);
        assert_eq!(writes[1], vec![6, 0, shtp::CHANNEL_HUB_CONTROL, 0, shtp::SHUB_PROD_ID_REQ, 0]);
    }

    #[test]
    fn test_init_without_product_id_fails() {
        let mut imu = driver(vec![]);
        assert_eq!(imu.init(), Err(SensorError::ProductIdMissing));
    }

    #[test]
    fn test_enable_feature_acknowledged() {
        let mut imu = driver(vec![feature_ack(shtp::REPORT_ROTATION_VECTOR)]);
        imu.enable_feature(Feature::RotationVector, Duration::from_millis(10))
            .unwrap();

        let command = &imu.i2c.writes[0];
        assert_eq!(command.len(), HEADER_LEN + 17);
        assert_eq!(command[2], shtp::CHANNEL_HUB_CONTROL);
        assert_eq!(command[4], shtp::SHUB_SET_FEATURE_CMD);
        assert_eq!(command[5], shtp::REPORT_ROTATION_VECTOR);
        // 10 ms = 10000 us
        assert_eq!(&command[9..13], &10_000u32.to_le_bytes());
    }

    #[test]
    fn test_enable_feature_not_acknowledged() {
        // acknowledgement for a different report does not count
        let mut imu = driver(vec![feature_ack(shtp::REPORT_ACCELEROMETER)]);
        assert_eq!(
            imu.enable_feature(Feature::MagneticField, Duration::from_millis(10)),
            Err(SensorError::FeatureNotAcknowledged(Feature::MagneticField))
        );
    }

    #[test]
    fn test_sequence_numbers_per_channel() {
        let mut imu = driver(vec![
            feature_ack(shtp::REPORT_ACCELEROMETER),
            feature_ack(shtp::REPORT_GYROSCOPE),
        ]);
        imu.enable_feature(Feature::Accelerometer, Duration::from_millis(10)).unwrap();
        imu.enable_feature(Feature::Gyroscope, Duration::from_millis(10)).unwrap();
        assert_eq!(imu.i2c.writes[0][3], 0);
        assert_eq!(imu.i2c.writes[1][3], 1);
    }

    #[test]
    fn test_input_reports_scaled() {
        let mut imu = driver(vec![sensor_packet(&[
            report(shtp::REPORT_ACCELEROMETER, &[256, 512, 768]),
            report(shtp::REPORT_GYROSCOPE, &[256, -512, 1024]),
            report(shtp::REPORT_ROTATION_VECTOR, &[0, 0, 0, 16384, 2048]),
            report(shtp::REPORT_MAGNETIC_FIELD, &[320, -80, 680]),
        ])]);

        assert_eq!(imu.read_acceleration().unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(imu.read_angular_velocity().unwrap(), [0.5, -1.0, 2.0]);
        assert_eq!(imu.read_orientation().unwrap(), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(imu.orientation_accuracy(), 0.5);
        assert_eq!(imu.read_magnetic_field().unwrap(), [20.0, -5.0, 42.5]);
    }

    #[test]
    fn test_quaternion_component_order() {
        let mut imu = driver(vec![sensor_packet(&[report(
            shtp::REPORT_ROTATION_VECTOR,
            &[4096, 8192, -4096, 12288, 0],
        )])]);
        assert_eq!(imu.read_orientation().unwrap(), [0.25, 0.5, -0.25, 0.75]);
    }

    #[test]
    fn test_newest_report_wins() {
        let mut imu = driver(vec![
            sensor_packet(&[report(shtp::REPORT_ACCELEROMETER, &[256, 256, 256])]),
            sensor_packet(&[report(shtp::REPORT_ACCELEROMETER, &[512, 512, 512])]),
        ]);
        assert_eq!(imu.read_acceleration().unwrap(), [2.0, 2.0, 2.0]);
        // nothing new queued, previous value stays
        assert_eq!(imu.read_acceleration().unwrap(), [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_stale_report_is_flagged() {
        let mut imu = driver(vec![sensor_packet(&[report(shtp::REPORT_ACCELEROMETER, &[256, 0, 0])])]);

        assert_eq!(imu.read_acceleration().unwrap(), [1.0, 0.0, 0.0]);
        assert!(!imu.readings.fresh.contains(Feature::Accelerometer));

        // nothing new: previous value, still not fresh
        assert_eq!(imu.read_acceleration().unwrap(), [1.0, 0.0, 0.0]);
        assert!(imu.readings.fresh.is_empty());
    }

    #[test]
    fn test_reports_stay_fresh_until_read() {
        let mut imu = driver(vec![sensor_packet(&[
            report(shtp::REPORT_ACCELEROMETER, &[256, 0, 0]),
            report(shtp::REPORT_GYROSCOPE, &[512, 0, 0]),
        ])]);

        imu.read_acceleration().unwrap();
        assert!(imu.readings.fresh.contains(Feature::Gyroscope));
        imu.read_angular_velocity().unwrap();
        assert!(imu.readings.fresh.is_empty());
    }

    #[test]
    fn test_short_repeated_header_is_bus_error() {
        // header promises 8 bytes, the full read repeats a 2-byte header
        let mut imu = driver(vec![
            Reply::Garbled(vec![8, 0, shtp::CHANNEL_SENSOR_REPORTS, 0], vec![2, 0, shtp::CHANNEL_SENSOR_REPORTS, 0]),
            sensor_packet(&[report(shtp::REPORT_ACCELEROMETER, &[256, 0, 0])]),
        ]);

        assert!(matches!(imu.read_acceleration(), Err(SensorError::Bus(_))));
        // next read recovers
        assert_eq!(imu.read_acceleration().unwrap(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unknown_report_stops_parsing() {
        let mut imu = driver(vec![sensor_packet(&[
            report(shtp::REPORT_ACCELEROMETER, &[256, 0, 0]),
            report(0x42, &[1, 2, 3]),
            report(shtp::REPORT_GYROSCOPE, &[512, 0, 0]),
        ])]);
        assert_eq!(imu.read_acceleration().unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(
            imu.read_angular_velocity(),
            Err(SensorError::NoData(Feature::Gyroscope))
        );
    }

    #[test]
    fn test_read_before_any_report() {
        let mut imu = driver(vec![]);
        assert_eq!(
            imu.read_magnetic_field(),
            Err(SensorError::NoData(Feature::MagneticField))
        );
    }

    #[test]
    fn test_bus_error_surfaces() {
        let mut imu = driver(vec![Reply::Nack]);
        assert!(matches!(imu.read_acceleration(), Err(SensorError::Bus(_))));
    }

    #[test]
    fn test_free_returns_bus() {
        let imu = driver(vec![]);
        let bus = imu.free();
        assert!(bus.writes.is_empty());
    }
}
