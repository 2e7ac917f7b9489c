//! # MSP v1 Checksum
//!
//! XOR checksum over the size byte, the command byte and every payload byte.
//! Later protocol versions switch to a CRC, but the checksum always remains
//! a function of the size/command/payload bytes alone.

/// Calculate the MSP v1 XOR checksum
///
/// # Arguments
///
/// * `command` - Command id byte
/// * `payload` - Payload bytes (may be empty)
///
/// # Returns
///
/// * `u8` - Calculated checksum
pub fn xor_checksum(command: u8, payload: &[u8]) -> u8 {
    let mut checksum = payload.len() as u8 ^ command;

    for &byte in payload {
        checksum ^= byte;
    }

    checksum
}
