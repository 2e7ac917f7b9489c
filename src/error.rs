//! # Error Types
//!
//! Custom error types for MSP Link using `thiserror`.
//!
//! Nothing in the engine is fatal to the process: framing errors are
//! recovered by resynchronizing the byte stream, transport errors surface
//! as a connection-state change, and command timeouts surface only to the
//! original caller through its callback.

use thiserror::Error;

/// Main error type for MSP Link
#[derive(Debug, Error)]
pub enum MspLinkError {
    /// Wire framing errors (checksum mismatch, malformed length)
    #[error("MSP framing error: {0}")]
    Framing(String),

    /// Transport channel errors (broken or closed link)
    #[error("transport error: {0}")]
    Transport(String),

    /// No usable serial device found
    #[error("no serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// A pending command's acknowledgment deadline elapsed
    #[error("command 0x{0:02X} timed out waiting for a response")]
    CommandTimeout(u8),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MSP Link
pub type Result<T> = std::result::Result<T, MspLinkError>;
