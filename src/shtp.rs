//! SHTP (Sensor Hub Transport Protocol) framing for BNO08x devices
//!
//! Every transfer starts with a 4-byte header:
//!
//! ```text
//! Byte 0  length LSB
//! Byte 1  length MSB (bit 7 = continuation flag)
//! Byte 2  channel
//! Byte 3  sequence number
//! ```
//!
//! The length includes the header itself. A length of zero means the hub has
//! nothing to send.

/// Header length in bytes
pub const HEADER_LEN: usize = 4;

/// Largest packet we are prepared to receive
pub const RECV_BUF_LEN: usize = 512;

/// Largest packet we ever send
pub const SEND_BUF_LEN: usize = 64;

/// Number of SHTP channels we track sequence numbers for
pub const NUM_CHANNELS: usize = 6;

// Channels
pub const CHANNEL_COMMAND: u8 = 0;
pub const CHANNEL_EXECUTABLE: u8 = 1;
pub const CHANNEL_HUB_CONTROL: u8 = 2;
pub const CHANNEL_SENSOR_REPORTS: u8 = 3;
pub const CHANNEL_WAKE_REPORTS: u8 = 4;
pub const CHANNEL_GYRO_ROTATION: u8 = 5;

// Executable channel
pub const EXECUTABLE_CMD_RESET: u8 = 0x01;
pub const EXECUTABLE_RESP_RESET_COMPLETE: u8 = 0x01;

// Hub control channel report ids
pub const SHUB_PROD_ID_REQ: u8 = 0xF9;
pub const SHUB_PROD_ID_RESP: u8 = 0xF8;
pub const SHUB_SET_FEATURE_CMD: u8 = 0xFD;
pub const SHUB_GET_FEATURE_RESP: u8 = 0xFC;
pub const SHUB_COMMAND_RESP: u8 = 0xF1;

// Input report ids
pub const REPORT_BASE_TIMESTAMP: u8 = 0xFB;
pub const REPORT_TIMESTAMP_REBASE: u8 = 0xFA;
pub const REPORT_ACCELEROMETER: u8 = 0x01;
pub const REPORT_GYROSCOPE: u8 = 0x02;
pub const REPORT_MAGNETIC_FIELD: u8 = 0x03;
pub const REPORT_ROTATION_VECTOR: u8 = 0x05;

/// Byte length of an input report including its 4-byte report header
pub fn report_len(report_id: u8) -> Option<usize> {
    match report_id {
        REPORT_BASE_TIMESTAMP | REPORT_TIMESTAMP_REBASE => Some(5),
        REPORT_ACCELEROMETER | REPORT_GYROSCOPE | REPORT_MAGNETIC_FIELD => Some(10),
        REPORT_ROTATION_VECTOR => Some(14),
        _ => None,
    }
}

/// Q-point of the primary values of an input report
pub fn q_point(report_id: u8) -> Option<u8> {
    match report_id {
        REPORT_ACCELEROMETER => Some(8),
        REPORT_GYROSCOPE => Some(9),
        REPORT_MAGNETIC_FIELD => Some(4),
        REPORT_ROTATION_VECTOR => Some(ROTATION_VECTOR_Q_POINT),
        _ => None,
    }
}

/// Q-point of the rotation vector quaternion
pub const ROTATION_VECTOR_Q_POINT: u8 = 14;

/// Q-point of the rotation vector accuracy estimate
pub const ROTATION_ACCURACY_Q_POINT: u8 = 12;

/// Convert a Q-point fixed-point value to floating point
pub fn q_to_f64(value: i16, q_point: u8) -> f64 {
    f64::from(value) / f64::from(1u32 << q_point)
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total packet length including the header
    pub length: usize,
    /// More fragments follow
    pub continuation: bool,
    pub channel: u8,
    pub sequence: u8,
}

impl Header {
    /// Decode a header, returning `None` for the hub's "no data" answer
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Option<Self> {
        // 0xFFFF shows up while the hub is still booting
        if bytes[0] == 0xFF && bytes[1] == 0xFF {
            return None;
        }
        let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
        let length = usize::from(raw & 0x7FFF);
        if length == 0 {
            return None;
        }
        Some(Self {
            length,
            continuation: raw & 0x8000 != 0,
            channel: bytes[2],
            sequence: bytes[3],
        })
    }

    /// Encode a header for an outgoing packet
    pub fn encode(length: usize, channel: u8, sequence: u8) -> [u8; HEADER_LEN] {
        let length = (length as u16) & 0x7FFF;
        let [lsb, msb] = length.to_le_bytes();
        [lsb, msb, channel, sequence]
    }
}

/// Read a little-endian i16 at `offset`
pub fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}
