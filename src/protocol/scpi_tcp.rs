use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use crate::error::{Error, Result};

use super::{Protocol, ScpiProtocol, scpi::printable};

/// SCPI over a raw TCP socket, one reply line per query
pub struct ScpiTcpProtocol {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}
impl ScpiTcpProtocol {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            stream: None,
        }
    }
}
#[async_trait]
impl Protocol for ScpiTcpProtocol {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Connection("Already connected".into()));
        }

        debug!(host = self.host.as_str(), port = self.port; "connecting");

        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "Connecting to {}:{} for {} ms",
                self.host,
                self.port,
                self.timeout.as_millis()
            ))
        })?
        .map_err(|e| Error::Connection(format!("{}:{}: {e}", self.host, self.port)))?;

        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!(host = self.host.as_str(), port = self.port; "disconnecting");
            stream.get_mut().shutdown().await?;
        }
        Ok(())
    }
}
#[async_trait]
impl ScpiProtocol for ScpiTcpProtocol {
    async fn int_send(&mut self, data: &[u8]) -> Result<()> {
        let Some(stream) = &mut self.stream else {
            return Err(Error::Connection("Not connected".into()));
        };

        debug!("int_send(): {}", printable(data));

        stream.get_mut().write_all(data).await?;

        Ok(())
    }

    async fn int_recv(&mut self) -> Result<Vec<u8>> {
        let Some(stream) = &mut self.stream else {
            return Err(Error::Connection("Not connected".into()));
        };

        let mut resp = vec![];
        let reply = tokio::time::timeout(self.timeout, stream.read_until(b'\n', &mut resp)).await;
        let read = match reply {
            Ok(read) => read?,
            Err(_) => {
                // A late reply would be taken as the answer to the next query
                self.stream = None;
                return Err(Error::Timeout(format!(
                    "No reply from {}:{} within {} ms, connection dropped",
                    self.host,
                    self.port,
                    self.timeout.as_millis()
                )));
            }
        };
        if read == 0 {
            self.stream = None;
            return Err(Error::Connection(format!(
                "{}:{} closed the connection",
                self.host, self.port
            )));
        }

        debug!("int_recv: {}", printable(&resp));

        Ok(resp)
    }

    async fn int_query(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.int_send(data).await?;
        self.int_recv().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;

    #[tokio::test]
    async fn query_reads_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\r\n");
            sock.write_all(b"RIGOL TECHNOLOGIES,DP832,X,1\n")
                .await
                .unwrap();
        });

        let mut proto = ScpiTcpProtocol::new("127.0.0.1", port, Duration::from_secs(2));
        proto.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(proto);
        let idn = proto.identify().await.unwrap();
        assert_eq!(idn, "RIGOL TECHNOLOGIES,DP832,X,1");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(sock);
        });

        let mut proto = ScpiTcpProtocol::new("127.0.0.1", port, Duration::from_millis(50));
        proto.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(proto);
        let res = proto.query(":MEAS:ALL? CH1").await;
        assert!(matches!(res, Err(Error::Timeout(_))), "{res:?}");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_by_next_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            sock.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            // Peer may already be gone, ignore write errors
            let _ = sock.write_all(b"12.000\n").await;
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(b"0.5000\n").await;
        });

        let mut proto = ScpiTcpProtocol::new("127.0.0.1", port, Duration::from_millis(100));
        proto.connect().await.unwrap();
        let mut proto: Box<dyn ScpiProtocol> = Box::new(proto);

        let res = proto.query("SOURCE1:VOLT?").await;
        assert!(matches!(res, Err(Error::Timeout(_))), "{res:?}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let res = proto.query("SOURCE1:CURR?").await;
        assert!(matches!(res, Err(Error::Connection(_))), "{res:?}");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let mut proto: Box<dyn ScpiProtocol> =
            Box::new(ScpiTcpProtocol::new("127.0.0.1", 1, Duration::from_millis(50)));
        assert!(matches!(
            proto.send("OUTP CH1,ON").await,
            Err(Error::Connection(_))
        ));
        // disconnect of a never-opened transport is a no-op
        proto.disconnect().await.unwrap();
    }
}
