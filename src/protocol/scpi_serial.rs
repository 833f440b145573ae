use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::{
    error::{Error, Result},
    protocol::{Protocol, ScpiProtocol, scpi::printable},
};

/// SCPI over an RS-232 or USB-CDC serial port
pub struct ScpiSerialProtocol {
    port: String,
    baud: u32,
    timeout: Duration,
    serial: Option<BufReader<SerialStream>>,
}
impl ScpiSerialProtocol {
    pub fn new(port: &str, baud: u32, timeout: Duration) -> Self {
        Self {
            port: port.to_string(),
            baud,
            timeout,
            serial: None,
        }
    }
}
#[async_trait]
impl Protocol for ScpiSerialProtocol {
    async fn connect(&mut self) -> Result<()> {
        if self.serial.is_some() {
            return Err(Error::Connection("Already connected".into()));
        }

        debug!(port = self.port.as_str(), baud = self.baud; "opening serial port");

        let serial = tokio_serial::new(&self.port, self.baud)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| Error::Connection(format!("{}: {e}", self.port)))?;
        self.serial = Some(BufReader::new(serial));

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.serial.take().is_some() {
            debug!(port = self.port.as_str(); "closed serial port");
        }
        Ok(())
    }
}
#[async_trait]
impl ScpiProtocol for ScpiSerialProtocol {
    async fn int_send(&mut self, data: &[u8]) -> Result<()> {
        let Some(serial) = &mut self.serial else {
            return Err(Error::Connection("Not connected".into()));
        };

        debug!("int_send(): {}", printable(data));

        serial.get_mut().write_all(data).await?;

        Ok(())
    }

    async fn int_recv(&mut self) -> Result<Vec<u8>> {
        let Some(serial) = &mut self.serial else {
            return Err(Error::Connection("Not connected".into()));
        };

        let mut resp = vec![];
        let reply = tokio::time::timeout(self.timeout, serial.read_until(b'\n', &mut resp)).await;
        let read = match reply {
            Ok(read) => read?,
            Err(_) => {
                // A late reply would be taken as the answer to the next query
                self.serial = None;
                return Err(Error::Timeout(format!(
                    "No reply on {} within {} ms, port closed",
                    self.port,
                    self.timeout.as_millis()
                )));
            }
        };
        if read == 0 {
            self.serial = None;
            return Err(Error::Connection(format!("{} closed", self.port)));
        }

        debug!("int_recv: {}", printable(&resp));

        Ok(resp)
    }

    async fn int_query(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.int_send(data).await?;
        self.int_recv().await
    }
}
