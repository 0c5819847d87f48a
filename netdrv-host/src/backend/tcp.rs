//! Raw TCP stream backend

use super::{Backend, BackendKind, Connection};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::target::Target;
use async_trait::async_trait;
use netdrv_api::TcpOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Backend for `tcp://host:port`, `/tcp/host:port` and bare `host:port` targets
#[derive(Debug, Default)]
pub struct TcpBackend;

impl TcpBackend {
    pub fn new() -> Self {
        Self
    }

    fn parse_options(options: &str) -> Result<TcpOptions, DriverError> {
        if options.trim().is_empty() {
            return Ok(TcpOptions::default());
        }
        serde_json::from_str(options)
            .map_err(|e| DriverError::bad_params(format!("invalid tcp options: {}", e)))
    }
}

#[async_trait]
impl Backend for TcpBackend {
    fn name(&self) -> &str {
        "tcp"
    }

    fn schemes(&self) -> &[&'static str] {
        &["tcp"]
    }

    async fn open(
        &self,
        target: &Target,
        options: &str,
        config: &DriverConfig,
    ) -> Result<Box<dyn Connection>, DriverError> {
        let opts = Self::parse_options(options)?;
        let addr = target.address();

        let connect = TcpStream::connect(addr);
        let result = match config.connect_timeout(opts.connect_timeout) {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", timeout),
                )),
            },
            None => connect.await,
        };
        let stream = result.map_err(|source| open_failed(addr, source))?;
        if opts.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|source| open_failed(addr, source))?;
        }

        tracing::debug!(address = %addr, nonblocking = opts.nonblocking, "TCP stream connected");
        Ok(Box::new(TcpConnection::new(stream, opts.nonblocking)))
    }
}

/// Any socket failure before the handle exists fails the open
fn open_failed(addr: &str, source: std::io::Error) -> DriverError {
    DriverError::Connect {
        target: addr.to_string(),
        source,
    }
}

/// Connected TCP stream
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    nonblocking: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, nonblocking: bool) -> Self {
        Self {
            stream,
            nonblocking,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Stream
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        if self.nonblocking {
            return match self.stream.try_read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(DriverError::TryAgain),
                Err(e) => Err(e.into()),
            };
        }
        Ok(self.stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError> {
        if self.nonblocking {
            return match self.stream.try_write(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(DriverError::TryAgain),
                Err(e) => Err(e.into()),
            };
        }
        Ok(self.stream.write(buf).await?)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // peer already gone; the socket is released on drop either way
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
