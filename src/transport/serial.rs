//! RS-232 / USB-serial transport.

use super::{classify_io, read_exact_from, read_line_from, Termination, Transport};
use scpi_core::{ScpiError, ScpiResult};
use serialport::SerialPort;
use std::io::{BufReader, Write};
use std::time::Duration;
use tracing::info;

/// Serial port transport built on the `serialport` crate.
pub struct SerialTransport {
    port: Option<BufReader<Box<dyn SerialPort>>>,
    path: String,
    termination: Termination,
    timeout: Duration,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` (8N1, no flow control).
    pub fn open(
        path: &str,
        baud_rate: u32,
        termination: Termination,
        timeout: Duration,
    ) -> ScpiResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| ScpiError::Resource {
                resource: path.to_string(),
                reason: format!("failed to open serial port: {}", e),
            })?;

        info!(path, baud_rate, "Opened serial port");
        Ok(Self {
            port: Some(BufReader::new(port)),
            path: path.to_string(),
            termination,
            timeout,
        })
    }

    fn port(&mut self) -> ScpiResult<&mut BufReader<Box<dyn SerialPort>>> {
        let path = &self.path;
        self.port
            .as_mut()
            .ok_or_else(|| ScpiError::TransportDisconnected(format!("serial port {} is closed", path)))
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> &'static str {
        "serial"
    }

    fn termination(&self) -> &Termination {
        &self.termination
    }

    fn send_raw(&mut self, bytes: &[u8]) -> ScpiResult<()> {
        let timeout = self.timeout;
        let port = self.port()?.get_mut();
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| classify_io(e, timeout))
    }

    fn read_until_terminator(&mut self) -> ScpiResult<Vec<u8>> {
        let (terminator, timeout) = (self.termination.read, self.timeout);
        read_line_from(self.port()?, terminator, timeout)
    }

    fn read_bytes(&mut self, n: usize) -> ScpiResult<Vec<u8>> {
        let timeout = self.timeout;
        read_exact_from(self.port()?, n, timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> ScpiResult<()> {
        self.port()?
            .get_mut()
            .set_timeout(timeout)
            .map_err(|e| ScpiError::Io(e.into()))?;
        self.timeout = timeout;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> ScpiResult<()> {
        if self.port.take().is_some() {
            info!(path = %self.path, "Closed serial port");
        }
        Ok(())
    }
}
