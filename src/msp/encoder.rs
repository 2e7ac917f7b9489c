//! # MSP Frame Encoder
//!
//! Encodes command frames into the MSP v1 wire format.

use super::checksum::xor_checksum;
use super::protocol::*;

/// Encode a frame into a complete MSP v1 byte sequence
///
/// # Arguments
///
/// * `frame` - Frame to encode (payload already validated against size limits)
///
/// # Returns
///
/// * `Vec<u8>` - Complete wire frame: `$M` + direction + size + command +
///   payload + checksum
///
/// # Examples
///
/// ```
/// use msp_link::msp::encoder::encode_frame;
/// use msp_link::msp::protocol::{MspFrame, MSP_STATUS};
///
/// let frame = encode_frame(&MspFrame::request(MSP_STATUS));
/// assert_eq!(frame, vec![b'$', b'M', b'<', 0, 101, 101]);
/// ```
pub fn encode_frame(frame: &MspFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.wire_length());

    out.push(MSP_PREAMBLE_0);
    out.push(MSP_PREAMBLE_1);
    out.push(frame.direction.as_byte());
    out.push(frame.payload.len() as u8);
    out.push(frame.command);
    out.extend_from_slice(&frame.payload);
    out.push(xor_checksum(frame.command, &frame.payload));

    out
}
