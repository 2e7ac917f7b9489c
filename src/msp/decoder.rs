//! # MSP Frame Decoder
//!
//! Incremental decoder for the MSP v1 wire format.
//!
//! The decoder is fed partial byte buffers as they arrive from the
//! transport and never errors on an incomplete frame. On a checksum
//! mismatch or bad preamble it reports [`DecodeStatus::Invalid`] and
//! resynchronizes by scanning forward for the next `$` byte, so a valid
//! frame immediately following corrupt bytes is still decoded.

use bytes::{Buf, BytesMut};

use super::checksum::xor_checksum;
use super::protocol::*;

/// Result of a single decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A complete, checksum-valid frame
    Frame(MspFrame),

    /// The buffer does not yet contain a complete frame
    NeedMoreData,

    /// Corrupt bytes were skipped; poll again for the next frame
    Invalid,
}

/// Incremental MSP frame decoder
///
/// Feed bytes with [`push`](FrameDecoder::push), then call
/// [`poll`](FrameDecoder::poll) until it returns
/// [`DecodeStatus::NeedMoreData`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    framing_errors: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes to the internal buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of corrupt byte runs skipped since creation
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Attempt to decode the next frame from the buffer
    ///
    /// Every [`DecodeStatus::Invalid`] return consumes at least one byte,
    /// so a caller looping until `NeedMoreData` always terminates.
    pub fn poll(&mut self) -> DecodeStatus {
        if self.buf.is_empty() {
            return DecodeStatus::NeedMoreData;
        }

        if self.buf[0] != MSP_PREAMBLE_0 {
            self.resync_from(0);
            return self.invalid();
        }

        if self.buf.len() >= 2 && self.buf[1] != MSP_PREAMBLE_1 {
            self.resync_from(1);
            return self.invalid();
        }

        let direction = if self.buf.len() >= 3 {
            match Direction::from_byte(self.buf[2]) {
                Some(dir) => Some(dir),
                None => {
                    self.resync_from(1);
                    return self.invalid();
                }
            }
        } else {
            None
        };

        // Header: preamble(2) + direction(1) + size(1) + command(1)
        if self.buf.len() < 5 {
            return DecodeStatus::NeedMoreData;
        }

        let size = self.buf[3] as usize;
        let total = MSP_FRAME_OVERHEAD + size;
        if self.buf.len() < total {
            return DecodeStatus::NeedMoreData;
        }

        let command = self.buf[4];
        let payload = &self.buf[5..5 + size];
        let received = self.buf[5 + size];
        let calculated = xor_checksum(command, payload);

        if calculated != received {
            // The remainder may contain a valid frame, so only skip to the
            // next preamble candidate instead of draining the whole run.
            self.resync_from(1);
            return self.invalid();
        }

        let frame = MspFrame {
            command,
            payload: payload.to_vec(),
            // Header bytes were validated above, direction is present
            direction: direction.unwrap_or(Direction::Response),
        };
        self.buf.advance(total);

        DecodeStatus::Frame(frame)
    }

    /// Drop bytes up to the next `$` at or after `start`, or everything if
    /// no candidate preamble remains
    fn resync_from(&mut self, start: usize) {
        match self.buf[start..]
            .iter()
            .position(|&b| b == MSP_PREAMBLE_0)
        {
            Some(offset) => self.buf.advance(start + offset),
            None => self.buf.clear(),
        }
    }

    fn invalid(&mut self) -> DecodeStatus {
        self.framing_errors += 1;
        DecodeStatus::Invalid
    }
}
