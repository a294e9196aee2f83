//! Simulated instrument for tests and `--simulate` runs.
//!
//! The simulator understands just enough SCPI to exercise the core:
//! - canned responses per query (`respond`, `respond_bytes`),
//! - an optional handler closure consulted before anything else,
//! - settings echo: after `HDR args`, the query `HDR?` answers `args`,
//! - `*IDN?`, `*OPC?`, `*RST`, `*CLS` and a `SYST:ERR?` queue,
//! - `;`-separated compound commands, query answers joined with `;`.
//!
//! A query with no answer produces no output, so the next read times out
//! like a real instrument that did not understand the header.
//!
//! `SimTransport` is a handle: clones share one simulated instrument, so a
//! test can keep a clone to inspect the call log after handing the
//! transport to a `Core`.

use super::{Termination, Transport};
use parking_lot::Mutex;
use scpi_core::{ScpiError, ScpiResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

const IDN: &str = "Simulated,SCPI-SIM,0,1.0";
const NO_ERROR: &str = "0,\"No error\"";
const ERROR_QUERIES: [&str; 4] = [
    "SYST:ERR?",
    "SYSTEM:ERROR?",
    "SYST:ERR:NEXT?",
    "SYSTEM:ERROR:NEXT?",
];

type Handler = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// One-shot failure injected into the next transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFailure {
    /// The next read times out and pending output is discarded.
    Timeout,
    /// The next send or read finds the connection dropped.
    Disconnect,
}

struct SimState {
    timeout: Duration,
    connected: bool,
    responses: HashMap<String, Vec<u8>>,
    settings: HashMap<String, String>,
    errors: VecDeque<String>,
    handler: Option<Handler>,
    output: VecDeque<u8>,
    call_log: Vec<String>,
    fail_next: Option<SimFailure>,
}

/// In-process simulated SCPI instrument.
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
    termination: Termination,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimTransport")
            .field("connected", &state.connected)
            .field("timeout", &state.timeout)
            .field("calls", &state.call_log.len())
            .finish()
    }
}

fn normalize(header: &str) -> String {
    header.trim().trim_start_matches(':').to_ascii_uppercase()
}

/// Split a compound command on `;` outside quoted strings.
fn split_compound(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ';') => {
                parts.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

impl SimTransport {
    /// Fresh simulator: connected, no canned responses, 5 s timeout.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                timeout: Duration::from_secs(5),
                connected: true,
                responses: HashMap::new(),
                settings: HashMap::new(),
                errors: VecDeque::new(),
                handler: None,
                output: VecDeque::new(),
                call_log: Vec::new(),
                fail_next: None,
            })),
            termination: Termination::default(),
        }
    }

    /// Use other line terminators.
    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    /// Timeout reported by reads that find no answer.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.state.lock().timeout = timeout;
        self
    }

    /// Install a handler consulted for every command before the built-ins.
    ///
    /// Returning `Some` answers a query; the return value for settings is
    /// ignored.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.state.lock().handler = Some(Box::new(handler));
        self
    }

    /// Answer `query` (matched case-insensitively) with `response`.
    pub fn respond(&self, query: &str, response: &str) {
        self.respond_bytes(query, response.as_bytes());
    }

    /// Answer `query` with raw bytes, e.g. a binary block.
    pub fn respond_bytes(&self, query: &str, response: &[u8]) {
        self.state
            .lock()
            .responses
            .insert(normalize(query), response.to_vec());
    }

    /// Queue an entry for `SYST:ERR?`.
    pub fn push_error(&self, error: &str) {
        self.state.lock().errors.push_back(error.to_string());
    }

    /// Make the next transport call fail.
    pub fn fail_next(&self, failure: SimFailure) {
        self.state.lock().fail_next = Some(failure);
    }

    /// Stored value of a setting written earlier, by header.
    pub fn setting(&self, header: &str) -> Option<String> {
        self.state.lock().settings.get(&normalize(header)).cloned()
    }

    /// Every command received, one entry per `;`-separated part.
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }

    /// Forget every command logged so far.
    pub fn clear_call_log(&self) {
        self.state.lock().call_log.clear();
    }
}

impl SimState {
    fn take_failure(&mut self, on_read: bool) -> ScpiResult<()> {
        match self.fail_next {
            Some(SimFailure::Disconnect) => {
                self.fail_next = None;
                self.connected = false;
                self.output.clear();
                Err(ScpiError::TransportDisconnected(
                    "simulated connection drop".into(),
                ))
            }
            Some(SimFailure::Timeout) if on_read => {
                self.fail_next = None;
                self.output.clear();
                Err(ScpiError::TransportTimeout {
                    timeout: self.timeout,
                })
            }
            _ => Ok(()),
        }
    }

    fn ensure_connected(&self) -> ScpiResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ScpiError::TransportDisconnected(
                "simulated instrument is closed".into(),
            ))
        }
    }

    fn execute(&mut self, command: &str) -> Option<Vec<u8>> {
        self.call_log.push(command.to_string());
        trace!(command, "sim received");

        let handled = self.handler.as_mut().and_then(|h| h(command));
        let (header, args) = match command.split_once(char::is_whitespace) {
            Some((h, a)) => (normalize(h), a.trim()),
            None => (normalize(command), ""),
        };

        if !header.ends_with('?') {
            if header == "*RST" {
                self.settings.clear();
            } else if header == "*CLS" {
                self.errors.clear();
            } else {
                self.settings.insert(header, args.to_string());
            }
            return None;
        }

        if let Some(answer) = handled {
            return Some(answer.into_bytes());
        }
        if let Some(canned) = self.responses.get(&normalize(command)) {
            return Some(canned.clone());
        }
        if let Some(canned) = self.responses.get(&header) {
            return Some(canned.clone());
        }
        match header.as_str() {
            "*IDN?" => return Some(IDN.as_bytes().to_vec()),
            "*OPC?" => return Some(b"1".to_vec()),
            h if ERROR_QUERIES.contains(&h) => {
                let entry = self.errors.pop_front();
                return Some(entry.as_deref().unwrap_or(NO_ERROR).as_bytes().to_vec());
            }
            _ => {}
        }
        self.settings
            .get(header.trim_end_matches('?'))
            .map(|v| v.clone().into_bytes())
    }
}

impl Transport for SimTransport {
    fn kind(&self) -> &'static str {
        "sim"
    }

    fn termination(&self) -> &Termination {
        &self.termination
    }

    fn send_raw(&mut self, bytes: &[u8]) -> ScpiResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.take_failure(false)?;

        let text = String::from_utf8_lossy(bytes);
        let line = text
            .strip_suffix(self.termination.write.as_str())
            .unwrap_or(&text);

        let answers: Vec<Vec<u8>> = split_compound(line)
            .into_iter()
            .filter_map(|part| state.execute(part))
            .collect();
        if !answers.is_empty() {
            let joined = answers.join(&b';');
            state.output.extend(joined);
            state.output.push_back(self.termination.read);
        }
        Ok(())
    }

    fn read_until_terminator(&mut self) -> ScpiResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.take_failure(true)?;

        let terminator = self.termination.read;
        match state.output.iter().position(|b| *b == terminator) {
            Some(pos) => {
                let line: Vec<u8> = state.output.drain(..=pos).take(pos).collect();
                Ok(line)
            }
            None => Err(ScpiError::TransportTimeout {
                timeout: state.timeout,
            }),
        }
    }

    fn read_bytes(&mut self, n: usize) -> ScpiResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.take_failure(true)?;

        if state.output.len() < n {
            return Err(ScpiError::TransportTimeout {
                timeout: state.timeout,
            });
        }
        Ok(state.output.drain(..n).collect())
    }

    fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> ScpiResult<()> {
        self.state.lock().timeout = timeout;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn close(&mut self) -> ScpiResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.output.clear();
        Ok(())
    }
}
