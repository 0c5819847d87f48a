//! netdrv-api: Shared contract between the netdrv host and sandboxed guests
//!
//! This crate defines the protocol spoken across the trust boundary:
//! the import module and function names, the signed result codes, and
//! the option documents a guest serializes into the `options` argument of `open`.
//! Options travel as JSON text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wasm import module under which the driver functions are linked
pub const IMPORT_MODULE: &str = "netdrv";

/// Import names of the boundary operations
pub mod func {
    pub const OPEN: &str = "open";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const CLOSE: &str = "close";
    /// Response status of an HTTP handle
    pub const STATUS: &str = "status";
    /// Response header lookup on an HTTP handle
    pub const HEADER: &str = "header";
}

/// Result code returned by every boundary operation.
///
/// `0` is success and every failure is negative. End of stream is not an
/// error: a read that reaches it succeeds with zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    /// Unknown or already closed handle
    BadHandle = -1,
    /// Malformed options, target, or guest buffer description
    BadParams = -2,
    /// Target unreachable at open time (DNS, connect, timeout, request)
    OpenFailed = -3,
    /// Mid-stream read/write failure
    IoFailure = -4,
    /// Operation not supported by the handle's backend
    Unsupported = -5,
    /// No data available right now; the caller should retry
    TryAgain = -6,
    /// No backend registered for the target's scheme
    DriverNotFound = -7,
    /// Target rejected by the host's access policy
    PermissionDenied = -8,
    /// Live-handle capacity exhausted
    TooManyHandles = -9,
    /// Response carries no header of the requested name
    HeaderNotFound = -10,
}

impl ResultCode {
    const ALL: [ResultCode; 11] = [
        Self::Success,
        Self::BadHandle,
        Self::BadParams,
        Self::OpenFailed,
        Self::IoFailure,
        Self::Unsupported,
        Self::TryAgain,
        Self::DriverNotFound,
        Self::PermissionDenied,
        Self::TooManyHandles,
        Self::HeaderNotFound,
    ];

    /// Raw value as seen by the guest
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode a raw value, `None` for anything outside the table
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == value)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::BadHandle => "bad handle",
            Self::BadParams => "bad parameters",
            Self::OpenFailed => "open failed",
            Self::IoFailure => "i/o failure",
            Self::Unsupported => "unsupported operation",
            Self::TryAgain => "try again",
            Self::DriverNotFound => "driver not found",
            Self::PermissionDenied => "permission denied",
            Self::TooManyHandles => "too many handles",
            Self::HeaderNotFound => "header not found",
        };
        write!(f, "{} ({})", name, self.as_i32())
    }
}

/// Options for an HTTP request/response handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    /// HTTP method, case-insensitive (required)
    pub method: String,

    /// Connect timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Whole-request timeout in seconds, covering body reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,

    /// Extra request headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpOptions {
    /// Create options for the given method
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            connect_timeout: None,
            read_timeout: None,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    pub fn read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout = Some(secs);
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize to the textual form passed to `open`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Options for a raw TCP stream handle. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptions {
    /// Connect timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Report `TryAgain` instead of waiting when no data is ready
    #[serde(default)]
    pub nonblocking: bool,

    /// Disable Nagle's algorithm
    #[serde(default)]
    pub nodelay: bool,
}

impl TcpOptions {
    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    pub fn nonblocking(mut self) -> Self {
        self.nonblocking = true;
        self
    }

    pub fn nodelay(mut self) -> Self {
        self.nodelay = true;
        self
    }

    /// Serialize to the textual form passed to `open`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_values() {
        assert_eq!(ResultCode::Success.as_i32(), 0);
        assert_eq!(ResultCode::BadHandle.as_i32(), -1);
        assert_eq!(ResultCode::TryAgain.as_i32(), -6);
        assert_eq!(ResultCode::HeaderNotFound.as_i32(), -10);
        assert!(ResultCode::ALL[1..].iter().all(|c| c.as_i32() < 0));
    }

    #[test]
    fn test_result_code_decode() {
        for code in ResultCode::ALL {
            assert_eq!(ResultCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ResultCode::from_i32(1), None);
        assert_eq!(ResultCode::from_i32(-100), None);
    }

    #[test]
    fn test_http_options_camel_case() {
        let opts = HttpOptions::new("get")
            .connect_timeout(5)
            .read_timeout(10)
            .header("accept", "text/plain");
        let json = opts.to_json().unwrap();

        assert!(json.contains("\"connectTimeout\":5"));
        assert!(json.contains("\"readTimeout\":10"));
        assert!(!json.contains("body"));
    }

    #[test]
    fn test_http_options_ignore_unknown_keys() {
        let opts: HttpOptions =
            serde_json::from_str(r#"{"method":"post","retries":3,"body":"x"}"#).unwrap();
        assert_eq!(opts.method, "post");
        assert_eq!(opts.body.as_deref(), Some("x"));
        assert!(opts.headers.is_empty());
    }

    #[test]
    fn test_http_options_require_method() {
        let result: Result<HttpOptions, _> = serde_json::from_str(r#"{"connectTimeout":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_tcp_options_to_json() {
        let json = TcpOptions::default().nodelay().to_json().unwrap();
        assert_eq!(json, r#"{"nonblocking":false,"nodelay":true}"#);
        let decoded: TcpOptions = serde_json::from_str(&json).unwrap();
        assert!(decoded.nodelay);
    }

    #[test]
    fn test_tcp_options_defaults() {
        let opts: TcpOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, TcpOptions::default());
        assert!(!opts.nonblocking);
    }
}
