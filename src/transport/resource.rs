//! Resource strings naming an instrument connection.

use scpi_core::ScpiError;
use std::fmt;
use std::str::FromStr;

/// Default port of a raw SCPI socket.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Parsed instrument address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Raw SCPI over TCP.
    Tcp {
        /// Host name or address.
        host: String,
        /// TCP port, 5025 unless given.
        port: u16,
    },
    /// Serial line; `baud` falls back to the configured rate.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
        path: String,
        /// Explicit baud rate.
        baud: Option<u32>,
    },
    /// In-process simulator.
    Simulated,
}

fn invalid(resource: &str, reason: impl Into<String>) -> ScpiError {
    ScpiError::Resource {
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

fn parse_port(resource: &str, text: &str) -> Result<u16, ScpiError> {
    text.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| invalid(resource, format!("invalid port '{}'", text)))
}

impl FromStr for Resource {
    type Err = ScpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty resource"));
        }
        let upper = s.to_ascii_uppercase();
        if upper == "SIM" || upper == "SIMULATED" {
            return Ok(Resource::Simulated);
        }

        let parts: Vec<&str> = s.split("::").collect();
        let interface = parts[0].to_ascii_uppercase();

        if interface.starts_with("TCPIP") {
            let host = parts
                .get(1)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| invalid(s, "missing host"))?;
            let suffix = parts.last().map(|p| p.to_ascii_uppercase());
            return match (parts.len(), suffix.as_deref()) {
                (3, Some("INSTR")) => Ok(Resource::Tcp {
                    host: host.to_string(),
                    port: DEFAULT_SCPI_PORT,
                }),
                (4, Some("SOCKET")) => Ok(Resource::Tcp {
                    host: host.to_string(),
                    port: parse_port(s, parts[2])?,
                }),
                _ => Err(invalid(
                    s,
                    "expected TCPIP::<host>::INSTR or TCPIP::<host>::<port>::SOCKET",
                )),
            };
        }

        if interface.starts_with("ASRL") {
            if !parts
                .last()
                .is_some_and(|p| p.eq_ignore_ascii_case("INSTR"))
            {
                return Err(invalid(s, "serial resources end in ::INSTR"));
            }
            let raw_path = &parts[0][4..];
            if raw_path.is_empty() {
                return Err(invalid(s, "missing serial port"));
            }
            let path = if raw_path.chars().all(|c| c.is_ascii_digit()) {
                format!("COM{}", raw_path)
            } else {
                raw_path.to_string()
            };
            let baud = match parts.len() {
                2 => None,
                3 => Some(
                    parts[1]
                        .parse::<u32>()
                        .ok()
                        .filter(|b| *b > 0)
                        .ok_or_else(|| invalid(s, format!("invalid baud rate '{}'", parts[1])))?,
                ),
                _ => return Err(invalid(s, "expected ASRL<port>[::<baud>]::INSTR")),
            };
            return Ok(Resource::Serial { path, baud });
        }

        if ["GPIB", "USB", "VXI", "PXI"]
            .iter()
            .any(|p| interface.starts_with(p))
        {
            return Err(invalid(s, "interface not supported"));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => Ok(Resource::Tcp {
                host: host.to_string(),
                port: parse_port(s, port)?,
            }),
            _ => Err(invalid(s, "unrecognised resource format")),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Tcp { host, port } => write!(f, "TCPIP::{}::{}::SOCKET", host, port),
            Resource::Serial {
                path,
                baud: Some(baud),
            } => write!(f, "ASRL{}::{}::INSTR", path, baud),
            Resource::Serial { path, baud: None } => write!(f, "ASRL{}::INSTR", path),
            Resource::Simulated => f.write_str("SIM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(host: &str, port: u16) -> Resource {
        Resource::Tcp {
            host: host.into(),
            port,
        }
    }

    #[test]
    fn test_parse_tcp_forms() {
        assert_eq!(
            "TCPIP::192.168.1.20::INSTR".parse::<Resource>().unwrap(),
            tcp("192.168.1.20", 5025)
        );
        assert_eq!(
            "TCPIP0::cmw.lab::5000::SOCKET".parse::<Resource>().unwrap(),
            tcp("cmw.lab", 5000)
        );
        assert_eq!(
            "localhost:5025".parse::<Resource>().unwrap(),
            tcp("localhost", 5025)
        );
    }

    #[test]
    fn test_parse_serial_forms() {
        assert_eq!(
            "ASRL/dev/ttyUSB0::INSTR".parse::<Resource>().unwrap(),
            Resource::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: None
            }
        );
        assert_eq!(
            "ASRL3::115200::INSTR".parse::<Resource>().unwrap(),
            Resource::Serial {
                path: "COM3".into(),
                baud: Some(115200)
            }
        );
    }

    #[test]
    fn test_parse_simulated() {
        assert_eq!("sim".parse::<Resource>().unwrap(), Resource::Simulated);
        assert_eq!("SIMULATED".parse::<Resource>().unwrap(), Resource::Simulated);
    }

    #[test]
    fn test_rejects_bad_resources() {
        for bad in [
            "",
            "GPIB0::7::INSTR",
            "TCPIP::::INSTR",
            "TCPIP::host::70000::SOCKET",
            "TCPIP::host::5025::INSTR",
            "ASRL::INSTR",
            "ASRL1::fast::INSTR",
            "nonsense",
            "host:0",
        ] {
            let err = bad.parse::<Resource>().unwrap_err();
            assert!(
                matches!(err, ScpiError::Resource { .. }),
                "{bad}: {err:?}"
            );
        }
    }

    #[test]
    fn test_display_reparses() {
        for r in [
            tcp("10.0.0.5", 5025),
            Resource::Serial {
                path: "/dev/ttyS1".into(),
                baud: Some(9600),
            },
            Resource::Simulated,
        ] {
            assert_eq!(r.to_string().parse::<Resource>().unwrap(), r);
        }
    }
}
