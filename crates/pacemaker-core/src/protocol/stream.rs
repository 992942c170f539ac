//! Serial link abstraction
//!
//! The transport talks to a [`SerialLink`] opened through a [`PortOpener`], so
//! the same loop drives a real serial port or the simulated pacemaker.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{serial::open_port, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// A bidirectional byte link to the pacemaker
///
/// Reads are expected to time out quickly (returning `TimedOut`/`WouldBlock` or
/// `Ok(0)` when nothing arrived) rather than block indefinitely.
pub trait SerialLink: Read + Write + Send {
    /// Clone the link; both handles refer to the same underlying connection
    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>>;

    /// Discard any unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Opens links by port path
pub trait PortOpener: Send + Sync {
    /// Open the port at `path`
    fn open(&self, path: &str) -> Result<Box<dyn SerialLink>, ProtocolError>;
}

/// Serial port wrapper implementing SerialLink
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for SerialChannel {
    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// Opens real serial ports
#[derive(Debug, Clone)]
pub struct SystemPortOpener {
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout
    pub read_timeout: Duration,
}

impl Default for SystemPortOpener {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

impl PortOpener for SystemPortOpener {
    fn open(&self, path: &str) -> Result<Box<dyn SerialLink>, ProtocolError> {
        let port = open_port(path, Some(self.baud_rate), Some(self.read_timeout))?;
        let mut channel = SerialChannel::new(port);
        // Stale bytes from before the open would misalign the first frame
        channel.clear_input_buffer()?;
        Ok(Box::new(channel))
    }
}
