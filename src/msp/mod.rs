//! # MSP Protocol Module
//!
//! Implementation of the MultiWii Serial Protocol (MSP v1) wire format.
//!
//! This module handles:
//! - Frame encoding (preamble, direction, size, command, payload, checksum)
//! - Incremental frame decoding with resynchronization after corrupt bytes
//! - XOR checksum calculation
//! - Command id constants and payload builders for the status request set

pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod protocol;
