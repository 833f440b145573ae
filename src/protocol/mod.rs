use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

mod address;
mod scpi;
mod scpi_serial;
mod scpi_sim;
mod scpi_tcp;

pub use address::{DEFAULT_BAUD, DP800_SOCKET_PORT, ResourceAddress};
pub use scpi::ScpiProtocol;
pub use scpi_serial::ScpiSerialProtocol;
pub use scpi_sim::SimulatedDp832;
pub use scpi_tcp::ScpiTcpProtocol;

use crate::error::Result;

/// Default bound on connecting and on waiting for a reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Protocol: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Enumerates instrument addresses and opens connections to them
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<String>>;

    /// Open and connect the transport named by `address`
    async fn open(&self, address: &str) -> Result<Box<dyn ScpiProtocol>>;
}

/// Resource manager for raw TCP sockets, serial ports and the simulator
pub struct DefaultResourceManager {
    timeout: Duration,
    extra_resources: Vec<String>,
}
impl Default for DefaultResourceManager {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
impl DefaultResourceManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            extra_resources: vec![],
        }
    }

    /// Addresses that cannot be enumerated (LAN instruments) but should be listed
    pub fn with_resources(mut self, resources: impl IntoIterator<Item = String>) -> Self {
        self.extra_resources.extend(resources);
        self
    }

    /// Create an unconnected transport for `address`
    pub fn transport(&self, address: &ResourceAddress) -> Box<dyn ScpiProtocol> {
        match address {
            ResourceAddress::Tcp { host, port } => {
                Box::new(ScpiTcpProtocol::new(host, *port, self.timeout))
            }
            ResourceAddress::Serial { port, baud } => {
                Box::new(ScpiSerialProtocol::new(port, *baud, self.timeout))
            }
            ResourceAddress::Simulated => Box::new(SimulatedDp832::new()),
        }
    }
}
#[async_trait]
impl ResourceManager for DefaultResourceManager {
    async fn list_resources(&self) -> Result<Vec<String>> {
        let ports = tokio_serial::available_ports().unwrap_or_else(|e| {
            warn!("Could not enumerate serial ports: {e}");
            vec![]
        });
        let mut resources: Vec<String> = ports
            .into_iter()
            .map(|port| {
                ResourceAddress::Serial {
                    port: port.port_name,
                    baud: DEFAULT_BAUD,
                }
                .to_string()
            })
            .collect();
        resources.extend(self.extra_resources.iter().cloned());
        resources.push(ResourceAddress::Simulated.to_string());
        Ok(resources)
    }

    async fn open(&self, address: &str) -> Result<Box<dyn ScpiProtocol>> {
        let parsed: ResourceAddress = address.parse()?;
        let mut proto = self.transport(&parsed);
        proto.connect().await?;
        info!(resource = address; "opened {parsed}");
        Ok(proto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn lists_configured_and_simulated_resources() {
        let rm = DefaultResourceManager::default()
            .with_resources(["TCPIP0::192.168.1.5::inst0::INSTR".to_string()]);
        let resources = rm.list_resources().await.unwrap();
        assert!(resources.contains(&"TCPIP0::192.168.1.5::inst0::INSTR".to_string()));
        assert_eq!(resources.last().map(String::as_str), Some("SIM::DP832::INSTR"));
    }

    #[tokio::test]
    async fn open_rejects_unknown_scheme() {
        let rm = DefaultResourceManager::default();
        assert!(matches!(
            rm.open("GPIB0::5::INSTR").await,
            Err(Error::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn open_simulator_is_connected() {
        let rm = DefaultResourceManager::default();
        let mut proto = rm.open("SIM::DP832::INSTR").await.unwrap();
        assert!(proto.identify().await.unwrap().contains("DP832"));
    }
}
