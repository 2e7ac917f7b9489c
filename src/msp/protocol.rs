//! # MSP Protocol Constants and Types
//!
//! Core protocol definitions for MSP v1 communication.

use bytes::BufMut;

use crate::error::{MspLinkError, Result};

/// First preamble byte (always '$')
pub const MSP_PREAMBLE_0: u8 = b'$';

/// Second preamble byte (always 'M' for MSP v1)
pub const MSP_PREAMBLE_1: u8 = b'M';

/// Maximum MSP v1 payload size (size field is a single byte)
pub const MSP_MAX_PAYLOAD_SIZE: usize = 255;

/// Frame overhead: preamble(2) + direction(1) + size(1) + command(1) + checksum(1)
pub const MSP_FRAME_OVERHEAD: usize = 6;

// Status request set sent on every scheduler tick
pub const MSP_STATUS: u8 = 101;
pub const MSP_RAW_GPS: u8 = 106;
pub const MSP_COMP_GPS: u8 = 107;
pub const MSP_ATTITUDE: u8 = 108;
pub const MSP_ALTITUDE: u8 = 109;
pub const MSP_ANALOG: u8 = 110;
pub const MSP_MISC: u8 = 114;
pub const MSP_WP: u8 = 118;
pub const MSP_SET_WP: u8 = 209;

/// Waypoint slot used for position hold / follow-me
pub const WAYPOINT_POSHOLD: u8 = 16;

/// Waypoint slot holding the home position
pub const WAYPOINT_HOME: u8 = 0;

/// MSP_SET_WP action byte for a plain navigate-to waypoint
pub const WAYPOINT_ACTION_WAYPOINT: u8 = 1;

// Flight mode bits carried in the MSP_STATUS mode flags word
pub const MODE_ARM: u32 = 1 << 0;
pub const MODE_ANGLE: u32 = 1 << 1;
pub const MODE_HORIZON: u32 = 1 << 2;
pub const MODE_BARO: u32 = 1 << 3;
pub const MODE_MAG: u32 = 1 << 4;
pub const MODE_GPS_HOME: u32 = 1 << 5;
pub const MODE_GPS_HOLD: u32 = 1 << 6;

/// Direction of an MSP frame, carried as the third preamble byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ground station to flight controller ('<')
    Request,
    /// Flight controller to ground station ('>')
    Response,
    /// Flight controller rejected the command ('!')
    Error,
}

impl Direction {
    /// Wire representation of the direction byte
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }

    /// Parse a direction byte, or `None` for anything unknown
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }
}

/// One complete unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspFrame {
    /// Command id
    pub command: u8,

    /// Payload data (max 255 bytes)
    pub payload: Vec<u8>,

    /// Frame direction
    pub direction: Direction,
}

impl MspFrame {
    /// Create a new frame, validating the payload against the size field limit
    ///
    /// # Errors
    ///
    /// Returns `MspLinkError::Framing` if the payload exceeds
    /// [`MSP_MAX_PAYLOAD_SIZE`].
    pub fn new(direction: Direction, command: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MSP_MAX_PAYLOAD_SIZE {
            return Err(MspLinkError::Framing(format!(
                "payload size {} exceeds maximum {}",
                payload.len(),
                MSP_MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            command,
            payload,
            direction,
        })
    }

    /// Build an empty-payload status request
    pub fn request(command: u8) -> Self {
        Self {
            command,
            payload: Vec::new(),
            direction: Direction::Request,
        }
    }

    /// Total encoded length of this frame in bytes
    pub fn wire_length(&self) -> usize {
        MSP_FRAME_OVERHEAD + self.payload.len()
    }
}

/// Build the MSP_SET_WP payload for a "move to here" command
///
/// 21-byte layout: slot, action, latitude, longitude, altitude, then
/// the three 16-bit action parameters and the nav flag. Coordinates are
/// in degrees and encoded as little-endian `i32` in 1e-7 degree units;
/// altitude is in centimeters.
pub fn build_set_waypoint(wp_no: u8, latitude: f64, longitude: f64, altitude_cm: i32) -> MspFrame {
    let mut payload = Vec::with_capacity(21);
    payload.put_u8(wp_no);
    payload.put_u8(WAYPOINT_ACTION_WAYPOINT);
    payload.put_i32_le((latitude * 10_000_000.0) as i32);
    payload.put_i32_le((longitude * 10_000_000.0) as i32);
    payload.put_i32_le(altitude_cm);
    payload.put_u16_le(0); // p1: heading
    payload.put_u16_le(0); // p2: time to stay
    payload.put_u16_le(0); // p3
    payload.put_u8(0); // nav flag

    MspFrame {
        command: MSP_SET_WP,
        payload,
        direction: Direction::Request,
    }
}

/// Build the MSP_WP payload requesting a single waypoint slot
pub fn build_waypoint_request(wp_no: u8) -> MspFrame {
    MspFrame {
        command: MSP_WP,
        payload: vec![wp_no],
        direction: Direction::Request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trip() {
        for dir in [Direction::Request, Direction::Response, Direction::Error] {
            assert_eq!(Direction::from_byte(dir.as_byte()), Some(dir));
        }
        assert_eq!(Direction::from_byte(b'?'), None);
    }

    #[test]
    fn test_frame_constants() {
        assert_eq!(MSP_PREAMBLE_0, b'$');
        assert_eq!(MSP_PREAMBLE_1, b'M');
        assert_eq!(MSP_STATUS, 101);
        assert_eq!(MSP_MAX_PAYLOAD_SIZE, 255);
    }

    #[test]
    fn test_msp_frame() {
        let frame = MspFrame::new(Direction::Request, MSP_STATUS, vec![]).unwrap();
        assert_eq!(frame.command, 101);
        assert_eq!(frame.wire_length(), 6);
    }

    #[test]
    fn test_msp_frame_payload_too_large() {
        let result = MspFrame::new(Direction::Request, MSP_STATUS, vec![0u8; 256]);
        assert!(result.is_err());
    }

    #[test]
    fn test_msp_frame_max_payload() {
        let frame = MspFrame::new(Direction::Response, MSP_ANALOG, vec![0u8; 255]).unwrap();
        assert_eq!(frame.payload.len(), 255);
        assert_eq!(frame.wire_length(), 261);
    }

    #[test]
    fn test_build_set_waypoint() {
        let frame = build_set_waypoint(WAYPOINT_POSHOLD, 37.7749, -122.4194, 0);
        assert_eq!(frame.command, MSP_SET_WP);
        assert_eq!(frame.payload.len(), 21);
        assert_eq!(frame.payload[0], 16);
        assert_eq!(frame.payload[1], WAYPOINT_ACTION_WAYPOINT);

        let lat = i32::from_le_bytes(frame.payload[2..6].try_into().unwrap());
        let lon = i32::from_le_bytes(frame.payload[6..10].try_into().unwrap());
        assert_eq!(lat, 377_749_000);
        assert_eq!(lon, -1_224_194_000);
        // p1..p3 and the nav flag default to zero
        assert!(frame.payload[14..21].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_build_waypoint_request() {
        let frame = build_waypoint_request(WAYPOINT_HOME);
        assert_eq!(frame.command, MSP_WP);
        assert_eq!(frame.payload, vec![0]);
        assert_eq!(frame.direction, Direction::Request);
    }
}
