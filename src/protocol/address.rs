use std::{fmt::Display, str::FromStr};

use crate::error::{Error, Result};

/// Raw SCPI socket port of Rigol DP800 series LAN interfaces
pub const DP800_SOCKET_PORT: u16 = 5555;
/// Default serial baud rate of the DP800 RS-232 interface
pub const DEFAULT_BAUD: u32 = 9600;

/// A parsed VISA resource address
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceAddress {
    /// `TCPIP[n]::host::port::SOCKET`, or `TCPIP[n]::host[::inst0]::INSTR`
    Tcp { host: String, port: u16 },
    /// `ASRL<path>[,baud]::INSTR`
    Serial { port: String, baud: u32 },
    /// `SIM::DP832::INSTR`
    Simulated,
}
impl FromStr for ResourceAddress {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        let parts: Vec<_> = address.trim().split("::").collect();
        let kind = parts[0].to_uppercase();

        if kind.starts_with("TCPIP") {
            let Some(host) = parts.get(1).filter(|h| !h.is_empty()) else {
                return Err(Error::Validation(format!("Missing host in '{address}'")));
            };

            let port = match parts.last().map(|s| s.to_uppercase()).as_deref() {
                Some("SOCKET") => {
                    if parts.len() != 4 {
                        return Err(Error::Validation(format!(
                            "Expected TCPIP::host::port::SOCKET, got '{address}'"
                        )));
                    }
                    parts[2].parse().map_err(|e| {
                        Error::Validation(format!("Bad port '{}' in '{address}': {e}", parts[2]))
                    })?
                }
                Some("INSTR") if parts.len() <= 4 => DP800_SOCKET_PORT,
                _ if parts.len() == 2 => DP800_SOCKET_PORT,
                _ => {
                    return Err(Error::Validation(format!(
                        "Unrecognised TCPIP resource '{address}'"
                    )));
                }
            };

            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else if kind.starts_with("ASRL") {
            let port_spec = &parts[0]["ASRL".len()..];
            let (path, baud) = match port_spec.split_once(',') {
                Some((path, baud)) => (
                    path,
                    baud.parse().map_err(|e| {
                        Error::Validation(format!("Bad baud rate '{baud}' in '{address}': {e}"))
                    })?,
                ),
                None => (port_spec, DEFAULT_BAUD),
            };
            if path.is_empty() {
                return Err(Error::Validation(format!("Missing port in '{address}'")));
            }

            let port = if path.chars().all(|c| c.is_ascii_digit()) {
                numbered_serial_port(path)
            } else {
                path.to_string()
            };

            Ok(Self::Serial { port, baud })
        } else if kind == "SIM" {
            Ok(Self::Simulated)
        } else {
            Err(Error::NotSupported(format!("Resource type of '{address}'")))
        }
    }
}
impl Display for ResourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "TCPIP0::{host}::{port}::SOCKET"),
            Self::Serial { port, baud } if *baud == DEFAULT_BAUD => write!(f, "ASRL{port}::INSTR"),
            Self::Serial { port, baud } => write!(f, "ASRL{port},{baud}::INSTR"),
            Self::Simulated => write!(f, "SIM::DP832::INSTR"),
        }
    }
}

fn numbered_serial_port(num: &str) -> String {
    if cfg!(windows) {
        format!("COM{num}")
    } else {
        format!("/dev/ttyS{num}")
    }
}
