//! Instrument I/O core.
//!
//! [`Core`] owns one [`Transport`] behind a mutex. Every write or query
//! holds the lock for the whole exchange (command, response and the optional
//! status check), so a `Core` shared through `Arc` between threads never
//! interleaves two exchanges on the wire.
//!
//! Record encoding and command composition happen before the lock is taken;
//! a record that cannot be encoded never reaches the instrument.
//!
//! The core does not retry and does not reconnect. After a timeout the
//! connection is [`ConnectionState::Indeterminate`] until an exchange
//! succeeds; after a disconnect it is [`ConnectionState::Closed`] for good.

use crate::config::{ConnectionConfig, ScpiConfig};
use crate::transport::{self, Resource, Transport};
use parking_lot::Mutex;
use scpi_core::block::{encode_block, length_digits, parse_length};
use scpi_core::conversions::parse_int;
use scpi_core::{
    ArgStruct, ErrorKind, ScpiError, ScpiRecord, ScpiResult, StructRecord, Value,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection health as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Last exchange completed.
    Connected,
    /// A call timed out; the instrument may still send a late response.
    Indeterminate,
    /// Closed by the caller or dropped by the peer.
    Closed,
}

/// Exchange-level behaviour of a [`Core`].
#[derive(Debug, Clone, PartialEq)]
pub struct IoSettings {
    /// Timeout for `*OPC?` synchronised calls.
    pub opc_timeout: Duration,
    /// Drain `SYST:ERR?` after every exchange.
    pub query_instrument_status: bool,
    /// Upper bound on error queue entries read per check.
    pub max_error_queue: usize,
    /// Largest definite-length binary block accepted from the instrument.
    pub max_block_size: usize,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            opc_timeout: Duration::from_secs(30),
            query_instrument_status: true,
            max_error_queue: 50,
            max_block_size: 64 * 1024 * 1024,
        }
    }
}

impl From<&ConnectionConfig> for IoSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            opc_timeout: config.opc_timeout,
            query_instrument_status: config.query_instrument_status,
            max_error_queue: config.max_error_queue,
            max_block_size: config.max_block_size,
        }
    }
}

/// `*IDN?` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdnInfo {
    /// First `*IDN?` field.
    pub manufacturer: String,
    /// Second `*IDN?` field.
    pub model: String,
    /// Third `*IDN?` field, if reported.
    pub serial_number: Option<String>,
    /// Fourth `*IDN?` field, if reported.
    pub firmware: Option<String>,
}

impl ScpiRecord for IdnInfo {
    const NAME: &'static str = "IdnInfo";
    const FIELDS: &'static [ArgStruct] = &[
        ArgStruct::raw_string("Manufacturer"),
        ArgStruct::raw_string("Model"),
        ArgStruct::raw_string("Serial_Number").optional(),
        ArgStruct::raw_string("Firmware").optional(),
    ];

    fn from_record(r: &StructRecord) -> ScpiResult<Self> {
        Ok(Self {
            manufacturer: r.required("Manufacturer", r.string("Manufacturer"))?,
            model: r.required("Model", r.string("Model"))?,
            serial_number: r.string("Serial_Number")?,
            firmware: r.string("Firmware")?,
        })
    }

    fn to_record(&self) -> ScpiResult<StructRecord> {
        let mut record = Self::empty_record()
            .with("Manufacturer", Value::Str(self.manufacturer.clone()))?
            .with("Model", Value::Str(self.model.clone()))?;
        record.set("Serial_Number", self.serial_number.clone().map(Value::Str))?;
        record.set("Firmware", self.firmware.clone().map(Value::Str))?;
        Ok(record)
    }
}

struct CoreInner {
    transport: Box<dyn Transport>,
    state: ConnectionState,
}

/// Serialised access to one instrument.
pub struct Core {
    inner: Mutex<CoreInner>,
    settings: IoSettings,
    resource: String,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("resource", &self.resource)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Turn a command into its query form: `?` goes after the header, before
/// any parameters. Commands that already are queries are left alone.
fn as_query(command: &str) -> String {
    let command = command.trim();
    let (header, params) = match command.split_once(char::is_whitespace) {
        Some((header, params)) => (header, Some(params.trim_start())),
        None => (command, None),
    };
    let header = if header.ends_with('?') {
        header.to_string()
    } else {
        format!("{}?", header)
    };
    match params {
        Some(params) => format!("{} {}", header, params),
        None => header,
    }
}

/// Strip the `;1` appended by a trailing `*OPC?`.
fn strip_opc(response: &str) -> &str {
    match response.rsplit_once(';') {
        Some((body, "1")) => body,
        _ => response,
    }
}

impl Core {
    /// Wrap an already open transport.
    pub fn new(transport: Box<dyn Transport>, settings: IoSettings) -> Self {
        let resource = transport.kind().to_string();
        Self {
            inner: Mutex::new(CoreInner {
                transport,
                state: ConnectionState::Connected,
            }),
            settings,
            resource,
        }
    }

    /// Parse `resource` and open the matching transport.
    pub fn open(resource: &str, config: &ConnectionConfig) -> ScpiResult<Self> {
        let parsed: Resource = resource.parse()?;
        let transport = transport::open(&parsed, config)?;
        info!(resource = %parsed, kind = transport.kind(), "Instrument session opened");

        let mut core = Self::new(transport, IoSettings::from(config));
        core.resource = parsed.to_string();
        Ok(core)
    }

    /// Open the resource named in the configuration.
    pub fn from_config(config: &ScpiConfig) -> ScpiResult<Self> {
        Self::open(&config.connection.resource, &config.connection)
    }

    /// Resource string the core was opened with.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Exchange settings.
    pub fn settings(&self) -> &IoSettings {
        &self.settings
    }

    /// Health of the connection after the last exchange.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Current transport timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.lock().transport.timeout()
    }

    /// Change the transport timeout for subsequent exchanges.
    pub fn set_timeout(&self, timeout: Duration) -> ScpiResult<()> {
        self.inner.lock().transport.set_timeout(timeout)
    }

    /// Run one exchange under the lock and update the connection state.
    fn exchange<T>(
        &self,
        command: &str,
        timeout: Option<Duration>,
        check_status: bool,
        op: impl FnOnce(&mut dyn Transport) -> ScpiResult<T>,
    ) -> ScpiResult<T> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.state == ConnectionState::Closed {
            return Err(
                ScpiError::TransportDisconnected("connection is closed".into())
                    .with_command(command),
            );
        }

        let transport = inner.transport.as_mut();
        let result = match timeout {
            Some(t) => {
                let previous = transport.timeout();
                transport.set_timeout(t).and_then(|_| {
                    let result = op(&mut *transport);
                    let restored = transport.set_timeout(previous);
                    result.and_then(|v| restored.map(|_| v))
                })
            }
            None => op(&mut *transport),
        };
        let result = result.and_then(|v| {
            if check_status && self.settings.query_instrument_status {
                self.check_status(transport)?;
            }
            Ok(v)
        });

        match &result {
            Ok(_) => inner.state = ConnectionState::Connected,
            Err(e) => match e.kind() {
                ErrorKind::TransportTimeout => {
                    warn!(resource = %self.resource, command, "Instrument timed out");
                    inner.state = ConnectionState::Indeterminate;
                }
                ErrorKind::TransportDisconnected => {
                    warn!(resource = %self.resource, command, error = %e, "Instrument disconnected");
                    inner.state = ConnectionState::Closed;
                }
                ErrorKind::InstrumentStatus => {
                    inner.state = ConnectionState::Connected;
                    warn!(resource = %self.resource, command, error = %e, "Instrument reported errors");
                }
                _ => {}
            },
        }
        result.map_err(|e| e.with_command(command))
    }

    fn check_status(&self, transport: &mut dyn Transport) -> ScpiResult<()> {
        let errors = self.drain_errors(transport)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScpiError::InstrumentStatus { errors })
        }
    }

    fn drain_errors(&self, transport: &mut dyn Transport) -> ScpiResult<Vec<String>> {
        let mut errors = Vec::new();
        while errors.len() < self.settings.max_error_queue {
            transport.send("SYST:ERR?")?;
            let entry = transport.receive()?;
            let code = entry.split(',').next().and_then(|c| parse_int(c.trim()));
            if code == Some(0) {
                break;
            }
            errors.push(entry);
        }
        Ok(errors)
    }

    /// Send a command that produces no response.
    pub fn write(&self, command: &str) -> ScpiResult<()> {
        debug!(resource = %self.resource, command, "SCPI write");
        self.exchange(command, None, true, |t| t.send(command))
    }

    /// Send a query and return the response line.
    pub fn query(&self, query: &str) -> ScpiResult<String> {
        let query = as_query(query);
        let response = self.exchange(&query, None, true, |t| {
            t.send(&query)?;
            t.receive()
        })?;
        debug!(resource = %self.resource, command = %query, %response, "SCPI query");
        Ok(response)
    }

    /// Send a command and wait for completion with `*OPC?`.
    pub fn write_with_opc(&self, command: &str) -> ScpiResult<()> {
        let full = format!("{};*OPC?", command);
        debug!(resource = %self.resource, command, "SCPI write with OPC");
        self.exchange(command, Some(self.settings.opc_timeout), true, |t| {
            t.send(&full)?;
            t.receive().map(|_| ())
        })
    }

    /// Query with `*OPC?` synchronisation and the OPC timeout.
    pub fn query_with_opc(&self, query: &str) -> ScpiResult<String> {
        let query = as_query(query);
        let full = format!("{};*OPC?", query);
        let response = self.exchange(&query, Some(self.settings.opc_timeout), true, |t| {
            t.send(&full)?;
            t.receive()
        })?;
        let response = strip_opc(&response).to_string();
        debug!(resource = %self.resource, command = %query, %response, "SCPI query with OPC");
        Ok(response)
    }

    /// Write `"<command> <args>"` from a typed record.
    pub fn write_struct<R: ScpiRecord>(&self, command: &str, value: &R) -> ScpiResult<()> {
        let args = value.encode().map_err(|e| e.with_command(command))?;
        self.write(&format!("{} {}", command, args))
    }

    /// Write `"<command> <args>"` from a generic record.
    pub fn write_record(&self, command: &str, record: &StructRecord) -> ScpiResult<()> {
        let args = record.to_scpi_string().map_err(|e| e.with_command(command))?;
        self.write(&format!("{} {}", command, args))
    }

    /// Query and decode the response into a typed record.
    pub fn query_struct<R: ScpiRecord>(&self, query: &str) -> ScpiResult<R> {
        let query = as_query(query);
        let raw = self.query(&query)?;
        R::decode(&raw).map_err(|e| e.with_command(&query))
    }

    /// Query and decode into a generic record with the given field table.
    pub fn query_record(
        &self,
        query: &str,
        name: &'static str,
        fields: &'static [ArgStruct],
    ) -> ScpiResult<StructRecord> {
        let query = as_query(query);
        let raw = self.query(&query)?;
        StructRecord::parse(name, fields, &raw).map_err(|e| e.with_command(&query))
    }

    /// Query a response carried as an IEEE 488.2 binary block.
    pub fn query_bin_block(&self, query: &str) -> ScpiResult<Vec<u8>> {
        let query = as_query(query);
        let data = self.exchange(&query, None, true, |t| {
            t.send(&query)?;
            read_block(t, self.settings.max_block_size)
        })?;
        debug!(resource = %self.resource, command = %query, bytes = data.len(), "SCPI binary query");
        Ok(data)
    }

    /// Send `data` as a definite length block after `command`.
    pub fn write_bin_block(&self, command: &str, data: &[u8]) -> ScpiResult<()> {
        debug!(resource = %self.resource, command, bytes = data.len(), "SCPI binary write");
        self.exchange(command, None, true, |t| {
            let mut bytes = Vec::with_capacity(command.len() + data.len() + 16);
            bytes.extend_from_slice(command.as_bytes());
            bytes.push(b' ');
            bytes.extend_from_slice(&encode_block(data));
            bytes.extend_from_slice(t.termination().write.as_bytes());
            t.send_raw(&bytes)
        })
    }

    /// `*IDN?`
    pub fn identify(&self) -> ScpiResult<IdnInfo> {
        self.query_struct("*IDN?")
    }

    /// `*RST`, waiting for completion.
    pub fn reset(&self) -> ScpiResult<()> {
        self.write_with_opc("*RST")
    }

    /// `*CLS`
    pub fn clear_status(&self) -> ScpiResult<()> {
        self.write("*CLS")
    }

    /// Read and clear the instrument error queue.
    pub fn query_errors(&self) -> ScpiResult<Vec<String>> {
        self.exchange("SYST:ERR?", None, false, |t| self.drain_errors(t))
    }

    /// Close the transport; later calls fail with `TransportDisconnected`.
    pub fn close(&self) -> ScpiResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return Ok(());
        }
        inner.state = ConnectionState::Closed;
        info!(resource = %self.resource, "Instrument session closed");
        inner.transport.close()
    }
}

/// Chunk size used when discarding an oversized block.
const DISCARD_CHUNK: usize = 64 * 1024;

/// Read one binary block, including the trailing terminator.
///
/// A definite block longer than `max_len` is read off the link in bounded
/// chunks and dropped before `BinaryBlock` is returned.
fn read_block(t: &mut dyn Transport, max_len: usize) -> ScpiResult<Vec<u8>> {
    let head = t.read_bytes(2)?;
    if head[0] != b'#' {
        // Resynchronise before reporting
        t.read_until_terminator()?;
        return Err(ScpiError::BinaryBlock(format!(
            "expected '#', found '{}'",
            head[0].escape_ascii()
        )));
    }
    let digits = length_digits(head[1])?;
    if digits == 0 {
        return t.read_until_terminator();
    }
    let len = parse_length(&t.read_bytes(digits)?)?;
    if len > max_len {
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(DISCARD_CHUNK);
            t.read_bytes(chunk)?;
            remaining -= chunk;
        }
        t.read_until_terminator()?;
        return Err(ScpiError::BinaryBlock(format!(
            "block of {} bytes exceeds the {} byte limit",
            len, max_len
        )));
    }
    let data = t.read_bytes(len)?;
    t.read_until_terminator()?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimFailure, SimTransport};
    use tracing_test::traced_test;

    fn quiet() -> IoSettings {
        IoSettings {
            query_instrument_status: false,
            ..Default::default()
        }
    }

    fn core_with(sim: &SimTransport, settings: IoSettings) -> Core {
        Core::new(Box::new(sim.clone()), settings)
    }

    #[test]
    fn test_as_query() {
        assert_eq!(as_query("*IDN"), "*IDN?");
        assert_eq!(as_query("*IDN?"), "*IDN?");
        assert_eq!(as_query("CALC:DATA? TRACE1"), "CALC:DATA? TRACE1");
        assert_eq!(as_query("CALC:DATA TRACE1"), "CALC:DATA? TRACE1");
        assert_eq!(
            as_query("SENS:FREQ:STAR  1E9,2E9"),
            "SENS:FREQ:STAR? 1E9,2E9"
        );
    }

    #[test]
    fn test_query_with_parameters_puts_mark_on_header() {
        let sim = SimTransport::new();
        sim.respond("CALC:DATA? TRACE1", "1.0,2.0");
        let core = core_with(&sim, quiet());
        assert_eq!(core.query("CALC:DATA TRACE1").unwrap(), "1.0,2.0");
        assert_eq!(sim.call_log(), vec!["CALC:DATA? TRACE1"]);
    }

    #[test]
    fn test_strip_opc() {
        assert_eq!(strip_opc("1.5,2.5;1"), "1.5,2.5");
        assert_eq!(strip_opc("1.5,2.5"), "1.5,2.5");
    }

    #[test]
    fn test_write_and_query() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        core.write("SOUR:FREQ 1E9").unwrap();
        assert_eq!(core.query("SOUR:FREQ").unwrap(), "1E9");
        assert_eq!(sim.call_log(), vec!["SOUR:FREQ 1E9", "SOUR:FREQ?"]);
    }

    #[test]
    fn test_identify() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        let idn = core.identify().unwrap();
        assert_eq!(idn.manufacturer, "Simulated");
        assert_eq!(idn.model, "SCPI-SIM");
        assert_eq!(idn.firmware.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_status_check_reports_errors() {
        let sim = SimTransport::new();
        let core = core_with(&sim, IoSettings::default());
        sim.push_error("-113,\"Undefined header\"");

        let err = core.write("BOGus:HEADer 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstrumentStatus);
        assert_eq!(err.command(), Some("BOGus:HEADer 1"));
        assert!(err.to_string().contains("Undefined header"));
        assert_eq!(core.connection_state(), ConnectionState::Connected);

        // Queue drained: next exchange is clean
        core.write("BOGus:HEADer 2").unwrap();
    }

    #[test]
    fn test_query_errors_drains_queue() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        sim.push_error("-222,\"Data out of range\"");
        sim.push_error("-113,\"Undefined header\"");
        assert_eq!(core.query_errors().unwrap().len(), 2);
        assert!(core.query_errors().unwrap().is_empty());
    }

    #[test]
    fn test_timeout_marks_indeterminate() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        sim.fail_next(SimFailure::Timeout);
        sim.respond("MEAS:POW?", "-10.5");

        let err = core.query("MEAS:POW?").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportTimeout);
        assert_eq!(core.connection_state(), ConnectionState::Indeterminate);

        assert_eq!(core.query("MEAS:POW?").unwrap(), "-10.5");
        assert_eq!(core.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_closes() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        sim.fail_next(SimFailure::Disconnect);

        let err = core.write("*CLS").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);
        assert_eq!(core.connection_state(), ConnectionState::Closed);
        assert_eq!(
            core.query("*IDN?").unwrap_err().kind(),
            ErrorKind::TransportDisconnected
        );
    }

    #[test]
    fn test_opc_calls() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        sim.respond("INIT:IMM?", "0");
        core.write_with_opc("INIT:IMM").unwrap();
        assert_eq!(core.query_with_opc("INIT:IMM").unwrap(), "0");
        assert_eq!(
            sim.call_log(),
            vec!["INIT:IMM", "*OPC?", "INIT:IMM?", "*OPC?"]
        );
        assert_eq!(core.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_binary_block_query() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        let mut payload = encode_block(&[0x00, 0x0A, 0xFF, b'\n']);
        sim.respond_bytes("TRAC:DATA?", &payload);
        assert_eq!(
            core.query_bin_block("TRAC:DATA").unwrap(),
            vec![0x00, 0x0A, 0xFF, b'\n']
        );

        payload = b"0,\"not a block\"".to_vec();
        sim.respond_bytes("TRAC:DATA?", &payload);
        let err = core.query_bin_block("TRAC:DATA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryBlock);
        // Stream stayed in sync
        assert_eq!(core.query("*OPC").unwrap(), "1");
    }

    #[test]
    fn test_oversized_block_is_discarded() {
        let sim = SimTransport::new();
        let core = core_with(
            &sim,
            IoSettings {
                max_block_size: 8,
                ..quiet()
            },
        );
        sim.respond_bytes("TRAC:DATA?", &encode_block(&[7u8; 16]));
        let err = core.query_bin_block("TRAC:DATA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryBlock);
        assert!(err.to_string().contains("16 bytes"));
        assert_eq!(core.connection_state(), ConnectionState::Connected);
        assert_eq!(core.query("*OPC").unwrap(), "1");
    }

    #[test]
    fn test_huge_block_header_does_not_allocate_payload() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        sim.respond_bytes("TRAC:DATA?", b"#9999999999");
        let err = core.query_bin_block("TRAC:DATA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportTimeout);
        assert_eq!(core.connection_state(), ConnectionState::Indeterminate);
    }

    #[test]
    fn test_write_bin_block() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        core.write_bin_block("SYST:SET", b"abc").unwrap();
        assert_eq!(sim.call_log(), vec!["SYST:SET #13abc"]);
    }

    #[test]
    fn test_close_rejects_calls() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        core.close().unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Closed);
        assert!(core.write("*RST").is_err());
        assert!(sim.call_log().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_exchanges_are_logged() {
        let sim = SimTransport::new();
        let core = core_with(&sim, quiet());
        core.query("*IDN").unwrap();
        assert!(logs_contain("SCPI query"));
        assert!(logs_contain("*IDN?"));
    }
}
