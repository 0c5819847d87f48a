//! Driver error types
//!
//! Every failure inside the host is a [`DriverError`]. The boundary layer
//! only ever forwards its [`ResultCode`] to the guest.

use netdrv_api::ResultCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the dispatcher, handle table and backends
#[derive(Debug, Error)]
pub enum DriverError {
    /// Handle was never issued or is already closed
    #[error("Bad handle: {0}")]
    BadHandle(u32),

    /// Options, target or buffer description are malformed
    #[error("Bad parameters: {0}")]
    BadParams(String),

    /// No backend is registered for the target's scheme
    #[error("No driver registered for scheme '{0}'")]
    DriverNotFound(String),

    /// Target rejected by the access policy
    #[error("Access to '{0}' is not permitted")]
    PermissionDenied(String),

    /// Live-handle capacity exhausted
    #[error("Too many open handles (limit {0})")]
    TooManyHandles(usize),

    /// Raw stream connection could not be established
    #[error("Failed to connect to '{target}': {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP exchange failed at the transport level
    #[error("Request to '{target}' failed: {source}")]
    Request {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// Mid-stream socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mid-stream HTTP body failure
    #[error("Body transfer failed: {0}")]
    Transfer(#[source] reqwest::Error),

    /// Operation not supported by this backend
    #[error("Operation '{0}' is not supported by this handle")]
    Unsupported(&'static str),

    /// Response has no header of this name
    #[error("Header '{0}' not found")]
    HeaderNotFound(String),

    /// Non-blocking operation has nothing to do yet
    #[error("Resource temporarily unavailable")]
    TryAgain,

    /// Guest pointer/length pair falls outside its memory
    #[error("Memory access error: {0}")]
    MemoryAccess(String),
}

impl DriverError {
    /// Create a bad parameters error
    pub fn bad_params(reason: impl Into<String>) -> Self {
        Self::BadParams(reason.into())
    }

    /// Map to the guest-facing result code
    pub fn code(&self) -> ResultCode {
        match self {
            Self::BadHandle(_) => ResultCode::BadHandle,
            Self::BadParams(_) | Self::MemoryAccess(_) => ResultCode::BadParams,
            Self::DriverNotFound(_) => ResultCode::DriverNotFound,
            Self::PermissionDenied(_) => ResultCode::PermissionDenied,
            Self::TooManyHandles(_) => ResultCode::TooManyHandles,
            Self::Connect { .. } | Self::Request { .. } => ResultCode::OpenFailed,
            Self::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock => ResultCode::TryAgain,
            Self::Io(_) | Self::Transfer(_) => ResultCode::IoFailure,
            Self::Unsupported(_) => ResultCode::Unsupported,
            Self::HeaderNotFound(_) => ResultCode::HeaderNotFound,
            Self::TryAgain => ResultCode::TryAgain,
        }
    }
}

/// Errors raised while loading host configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
