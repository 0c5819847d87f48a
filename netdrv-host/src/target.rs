//! Open-target parsing
//!
//! Accepted forms:
//!
//! ```text
//! http://example.com/resource    scheme "http",  address "http://example.com/resource"
//! tcp://127.0.0.1:7000           scheme "tcp",   address "127.0.0.1:7000"
//! /tcp/127.0.0.1:7000            scheme "tcp",   address "127.0.0.1:7000"
//! 127.0.0.1:7000                 scheme "tcp",   address "127.0.0.1:7000"
//! ```
//!
//! URL-shaped schemes keep the full URL as address since the HTTP backend
//! needs it verbatim.

use crate::error::DriverError;

/// Scheme assumed for bare `host:port` targets
pub const DEFAULT_SCHEME: &str = "tcp";

/// A parsed open target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: String,
    address: String,
    raw: String,
}

impl Target {
    /// Parse a guest-supplied target string
    pub fn parse(raw: &str) -> Result<Self, DriverError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DriverError::bad_params("empty target"));
        }

        let (scheme, address) = if let Some((scheme, rest)) = trimmed.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            // stream-style schemes drop the prefix, URL-style schemes keep it
            let address = if scheme == DEFAULT_SCHEME {
                rest.to_string()
            } else {
                trimmed.to_string()
            };
            if rest.is_empty() {
                return Err(DriverError::bad_params(format!(
                    "target '{}' has no address",
                    raw
                )));
            }
            (scheme, address)
        } else if trimmed.starts_with('/') {
            let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
            let scheme = segments
                .next()
                .ok_or_else(|| DriverError::bad_params(format!("target '{}' has no scheme", raw)))?
                .to_ascii_lowercase();
            let address = segments.collect::<Vec<_>>().join("/");
            if address.is_empty() {
                return Err(DriverError::bad_params(format!(
                    "target '{}' has no address",
                    raw
                )));
            }
            (scheme, address)
        } else {
            (DEFAULT_SCHEME.to_string(), trimmed.to_string())
        };

        if scheme.is_empty() {
            return Err(DriverError::bad_params(format!(
                "target '{}' has no scheme",
                raw
            )));
        }

        Ok(Self {
            scheme,
            address,
            raw: trimmed.to_string(),
        })
    }

    /// Lower-cased scheme used for backend selection
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Backend-specific address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Target as supplied (trimmed)
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
