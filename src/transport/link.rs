//! Trait abstraction over the byte-stream link to enable testing
//!
//! The engine is agnostic to whether the underlying connection is a serial
//! port, a Bluetooth SPP channel or a socket; anything that can read and
//! write bytes implements [`ByteLink`].

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{MspLinkError, Result};

/// Default MSP baud rate for flight controller serial links
pub const MSP_BAUD_RATE: u32 = 115_200;

/// Default device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0",  // USB CDC devices (most common for flight controllers)
    "/dev/ttyUSB0",  // USB-to-serial adapters
    "/dev/rfcomm0",  // Bluetooth SPP bindings
];

/// Byte-oriented duplex link
#[async_trait]
pub trait ByteLink: Send {
    /// Read available bytes into `buf`, returning the count (0 means EOF)
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all bytes to the link
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Serial link to a flight controller
pub struct SerialByteLink {
    port: tokio_serial::SerialStream,
    device_path: String,
}

impl std::fmt::Debug for SerialByteLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialByteLink")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialByteLink {
    /// Open a link to the flight controller, auto-detecting the device by
    /// trying common paths
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if none of the default paths opens.
    pub fn open(baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
    }

    /// Open a link trying the given device paths in order
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened flight controller link at {}", path);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(MspLinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with MSP settings (8N1, no flow control)
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MspLinkError::Transport(format!("failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Path of the device that was successfully opened
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl ByteLink for SerialByteLink {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }
}

/// Adapter turning any async byte stream into a [`ByteLink`]
///
/// Used for TCP bridges and for tests over `tokio::io::duplex`.
pub struct IoLink<T>(pub T);

#[async_trait]
impl<T> ByteLink for IoLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.0.flush().await
    }
}
