//! Host-side driver configuration
//!
//! ```rust,ignore
//! use netdrv_host::DriverConfig;
//!
//! let config = DriverConfig::default()
//!     .with_max_handles(64)
//!     .with_allowed_targets(vec!["https://api.example.com".into()]);
//!
//! // or from a JSON file
//! let config = DriverConfig::from_file("netdrv.json")?;
//! ```

use crate::error::ConfigError;
use crate::policy::Endpoint;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default live-handle capacity
pub const DEFAULT_MAX_HANDLES: usize = 1024;

/// Default per-call transfer limit
pub const DEFAULT_MAX_TRANSFER: usize = 64 * 1024;

/// Configuration for a [`Driver`](crate::Driver)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Maximum number of simultaneously open handles
    pub max_handles: usize,

    /// Maximum bytes moved per read/write call
    pub max_transfer: usize,

    /// Endpoints the guest may open. Empty means unrestricted.
    pub allowed_targets: Vec<String>,

    /// Connect timeout used when the open request carries none
    pub default_connect_timeout_secs: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_handles: DEFAULT_MAX_HANDLES,
            max_transfer: DEFAULT_MAX_TRANSFER,
            allowed_targets: Vec::new(),
            default_connect_timeout_secs: None,
        }
    }
}

impl DriverConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check that limits are usable and allow-list entries parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_handles == 0 {
            return Err(ConfigError::Invalid {
                field: "max_handles",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_handles > i32::MAX as usize {
            return Err(ConfigError::Invalid {
                field: "max_handles",
                reason: format!("must not exceed {}", i32::MAX),
            });
        }
        if self.max_transfer == 0 {
            return Err(ConfigError::Invalid {
                field: "max_transfer",
                reason: "must be at least 1".into(),
            });
        }
        for entry in self.allowed_targets.iter().filter(|e| !e.trim().is_empty()) {
            Endpoint::parse_rule(entry).map_err(|e| ConfigError::Invalid {
                field: "allowed_targets",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }

    pub fn with_max_transfer(mut self, max: usize) -> Self {
        self.max_transfer = max;
        self
    }

    pub fn with_allowed_targets(mut self, entries: Vec<String>) -> Self {
        self.allowed_targets = entries;
        self
    }

    pub fn with_default_connect_timeout(mut self, secs: u64) -> Self {
        self.default_connect_timeout_secs = Some(secs);
        self
    }

    /// Connect timeout for an open request, falling back to the configured default
    pub(crate) fn connect_timeout(&self, requested: Option<u64>) -> Option<Duration> {
        requested
            .or(self.default_connect_timeout_secs)
            .map(Duration::from_secs)
    }
}
