//! Transport backends
//!
//! A [`Backend`] turns an open request into a live [`Connection`]. The
//! dispatcher owns every connection through the handle table and makes
//! sure `close` is delivered at most once.
//!
//! ```text
//!  open(target, options)
//!        │
//!        ▼
//!  Backend::open ──► Box<dyn Connection> ──► HandleTable
//!                          │
//!           read / write / close (one at a time per handle)
//! ```

pub mod http;
pub mod tcp;

pub use http::{HttpBackend, HttpConnection};
pub use tcp::{TcpBackend, TcpConnection};

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::target::Target;
use async_trait::async_trait;
use std::fmt;

/// Kind of transport behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Raw byte stream (TCP)
    Stream,
    /// HTTP request/response
    Http,
    /// Host-registered backend
    Custom,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Http => write!(f, "http"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Factory for connections of one transport kind
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name used in logs
    fn name(&self) -> &str;

    /// Schemes this backend serves (lower-case)
    fn schemes(&self) -> &[&'static str];

    /// Parse `options` and establish a connection to `target`.
    ///
    /// Must not leave partial state behind on failure.
    async fn open(
        &self,
        target: &Target,
        options: &str,
        config: &DriverConfig,
    ) -> Result<Box<dyn Connection>, DriverError>;
}

/// A live connection bound to one handle
#[async_trait]
pub trait Connection: Send {
    fn kind(&self) -> BackendKind;

    /// Read into `buf`. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;

    /// Write from `buf`, possibly partially.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError>;

    /// Release the underlying resources
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Response status code. Only request/response backends have one.
    fn status(&self) -> Result<u16, DriverError> {
        Err(DriverError::Unsupported("status"))
    }

    /// Raw value of the response header `name`
    fn header(&self, _name: &str) -> Result<Vec<u8>, DriverError> {
        Err(DriverError::Unsupported("header"))
    }
}
