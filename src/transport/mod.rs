//! Byte transports to instruments.
//!
//! A [`Transport`] moves terminated lines and raw bytes; it knows nothing
//! about records or commands. All calls are blocking and bounded by the
//! transport timeout. Failures are classified so the caller can tell a
//! timeout (state unknown) from a dropped connection.
//!
//! Implementations:
//! - [`TcpTransport`]: raw SCPI socket.
//! - [`SerialTransport`]: RS-232/USB serial (feature `instrument_serial`).
//! - [`SimTransport`]: in-process simulated instrument.

mod resource;
#[cfg(feature = "instrument_serial")]
mod serial;
mod sim;
mod tcp;

pub use resource::{Resource, DEFAULT_SCPI_PORT};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;
pub use sim::{SimFailure, SimTransport};
pub use tcp::TcpTransport;

use crate::config::ConnectionConfig;
use scpi_core::{ScpiError, ScpiResult};
use std::io::{self, BufRead, Read};
use std::time::Duration;

/// Line terminators used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Appended to every outgoing command.
    pub write: String,
    /// Ends every response line.
    pub read: u8,
}

impl Default for Termination {
    fn default() -> Self {
        Self {
            write: "\n".to_string(),
            read: b'\n',
        }
    }
}

impl Termination {
    /// Terminators from the connection configuration.
    pub fn from_config(config: &ConnectionConfig) -> ScpiResult<Self> {
        Ok(Self {
            write: config.write_termination.clone(),
            read: config.read_terminator()?,
        })
    }
}

/// Blocking, timeout-bounded byte transport.
pub trait Transport: Send {
    /// Short transport name for logs, e.g. `"tcp"`.
    fn kind(&self) -> &'static str;

    /// Line terminators in use.
    fn termination(&self) -> &Termination;

    /// Write bytes as-is.
    fn send_raw(&mut self, bytes: &[u8]) -> ScpiResult<()>;

    /// Read one response line; the terminator is consumed, not returned.
    fn read_until_terminator(&mut self) -> ScpiResult<Vec<u8>>;

    /// Read exactly `n` bytes.
    fn read_bytes(&mut self, n: usize) -> ScpiResult<Vec<u8>>;

    /// Current read/write timeout.
    fn timeout(&self) -> Duration;

    /// Change the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> ScpiResult<()>;

    /// False once closed or dropped by the peer.
    fn is_connected(&self) -> bool;

    /// Close the connection; later calls fail with `TransportDisconnected`.
    fn close(&mut self) -> ScpiResult<()>;

    /// Send a command followed by the write terminator.
    fn send(&mut self, command: &str) -> ScpiResult<()> {
        let mut bytes = Vec::with_capacity(command.len() + 2);
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(self.termination().write.as_bytes());
        self.send_raw(&bytes)
    }

    /// Read one response line as text, with a trailing `\r` removed.
    fn receive(&mut self) -> ScpiResult<String> {
        let bytes = self.read_until_terminator()?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_end_matches('\r').to_string())
    }
}

/// Map an I/O error onto the transport error taxonomy.
pub fn classify_io(err: io::Error, timeout: Duration) -> ScpiError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            ScpiError::TransportTimeout { timeout }
        }
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => ScpiError::TransportDisconnected(err.to_string()),
        _ => ScpiError::Io(err),
    }
}

/// Read up to and including `terminator` from a buffered stream.
pub(crate) fn read_line_from<R: BufRead>(
    reader: &mut R,
    terminator: u8,
    timeout: Duration,
) -> ScpiResult<Vec<u8>> {
    let mut buf = Vec::new();
    match reader.read_until(terminator, &mut buf) {
        Ok(0) => Err(ScpiError::TransportDisconnected(
            "connection closed by peer".into(),
        )),
        Ok(_) if buf.last() == Some(&terminator) => {
            buf.pop();
            Ok(buf)
        }
        Ok(n) => Err(ScpiError::TransportDisconnected(format!(
            "connection closed after {} bytes of an unterminated response",
            n
        ))),
        Err(e) => Err(classify_io(e, timeout)),
    }
}

/// Read exactly `n` bytes from a stream.
///
/// The buffer grows with the data actually received, so a bogus length
/// from the peer does not allocate up front.
pub(crate) fn read_exact_from<R: Read>(
    reader: &mut R,
    n: usize,
    timeout: Duration,
) -> ScpiResult<Vec<u8>> {
    let mut buf = Vec::new();
    let got = reader
        .take(n as u64)
        .read_to_end(&mut buf)
        .map_err(|e| classify_io(e, timeout))?;
    if got < n {
        return Err(ScpiError::TransportDisconnected(format!(
            "connection closed after {} of {} expected bytes",
            got, n
        )));
    }
    Ok(buf)
}

/// Open the transport named by `resource`.
pub fn open(resource: &Resource, config: &ConnectionConfig) -> ScpiResult<Box<dyn Transport>> {
    let termination = Termination::from_config(config)?;
    match resource {
        Resource::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(
            host,
            *port,
            termination,
            config.timeout,
        )?)),
        #[cfg(feature = "instrument_serial")]
        Resource::Serial { path, baud } => Ok(Box::new(SerialTransport::open(
            path,
            baud.unwrap_or(config.baud_rate),
            termination,
            config.timeout,
        )?)),
        #[cfg(not(feature = "instrument_serial"))]
        Resource::Serial { .. } => Err(ScpiError::Resource {
            resource: resource.to_string(),
            reason: "serial support requires the instrument_serial feature".into(),
        }),
        Resource::Simulated => Ok(Box::new(
            SimTransport::new()
                .with_termination(termination)
                .with_timeout(config.timeout),
        )),
    }
}
