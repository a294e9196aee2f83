//! Raw SCPI over TCP.

use super::{classify_io, read_exact_from, read_line_from, Termination, Transport};
use scpi_core::{ScpiError, ScpiResult};
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Blocking SCPI socket client.
pub struct TcpTransport {
    stream: BufReader<TcpStream>,
    termination: Termination,
    timeout: Duration,
    peer: String,
    connected: bool,
}

impl TcpTransport {
    /// Connect to `host:port`; `timeout` bounds the connect and every call.
    pub fn connect(
        host: &str,
        port: u16,
        termination: Termination,
        timeout: Duration,
    ) -> ScpiResult<Self> {
        let peer = format!("{}:{}", host, port);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| ScpiError::Resource {
                resource: peer.clone(),
                reason: e.to_string(),
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream, peer, termination, timeout),
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => classify_io(e, timeout),
            None => ScpiError::Resource {
                resource: peer,
                reason: "host resolved to no addresses".into(),
            },
        })
    }

    fn from_stream(
        stream: TcpStream,
        peer: String,
        termination: Termination,
        timeout: Duration,
    ) -> ScpiResult<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        // Commands are short; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        info!(%peer, "Connected to SCPI socket");
        Ok(Self {
            stream: BufReader::new(stream),
            termination,
            timeout,
            peer,
            connected: true,
        })
    }

    /// Peer address as `host:port`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn ensure_connected(&self) -> ScpiResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ScpiError::TransportDisconnected(format!(
                "socket to {} is closed",
                self.peer
            )))
        }
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn termination(&self) -> &Termination {
        &self.termination
    }

    fn send_raw(&mut self, bytes: &[u8]) -> ScpiResult<()> {
        self.ensure_connected()?;
        let timeout = self.timeout;
        let stream = self.stream.get_mut();
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| classify_io(e, timeout))
    }

    fn read_until_terminator(&mut self) -> ScpiResult<Vec<u8>> {
        self.ensure_connected()?;
        read_line_from(&mut self.stream, self.termination.read, self.timeout)
    }

    fn read_bytes(&mut self, n: usize) -> ScpiResult<Vec<u8>> {
        self.ensure_connected()?;
        read_exact_from(&mut self.stream, n, self.timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> ScpiResult<()> {
        let stream = self.stream.get_ref();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        self.timeout = timeout;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> ScpiResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        match self.stream.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        info!(peer = %self.peer, "Closed SCPI socket");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader as StdBufReader};
    use std::net::TcpListener;
    use std::thread;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn connect(port: u16, timeout: Duration) -> TcpTransport {
        TcpTransport::connect("127.0.0.1", port, Termination::default(), timeout).unwrap()
    }

    #[test]
    fn test_query_round_trip() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = StdBufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            let mut stream = stream;
            stream.write_all(b"Rohde&Schwarz,CMW,1201.0002k50/101234,3.7.171\r\n").unwrap();
        });

        let mut transport = connect(port, Duration::from_secs(2));
        transport.send("*IDN?").unwrap();
        assert_eq!(
            transport.receive().unwrap(),
            "Rohde&Schwarz,CMW,1201.0002k50/101234,3.7.171"
        );
        server.join().unwrap();
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (listener, port) = listener();
        let mut transport = connect(port, Duration::from_millis(100));
        let (_server, _) = listener.accept().unwrap();

        transport.send("FETCh:BLUetooth:MEASurement1:MEValuation:PVTime:CURRent?").unwrap();
        let err = transport.receive().unwrap_err();
        assert!(matches!(err, ScpiError::TransportTimeout { .. }), "{err:?}");
    }

    #[test]
    fn test_peer_close_is_disconnect() {
        let (listener, port) = listener();
        let mut transport = connect(port, Duration::from_secs(2));
        let (server, _) = listener.accept().unwrap();
        drop(server);

        let err = transport.receive().unwrap_err();
        assert!(matches!(err, ScpiError::TransportDisconnected(_)), "{err:?}");
    }

    #[test]
    fn test_closed_transport_rejects_calls() {
        let (listener, port) = listener();
        let mut transport = connect(port, Duration::from_secs(1));
        let (_server, _) = listener.accept().unwrap();

        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send("*CLS"),
            Err(ScpiError::TransportDisconnected(_))
        ));
        transport.close().unwrap();
    }
}
