//! Target access policy
//!
//! A host may restrict which targets a guest can open by listing allowed
//! endpoints. Both the allowed entries and the guest's target are parsed
//! into an [`Endpoint`] and compared field by field:
//!
//! ```text
//! rule    http://api.example.com/v1    scheme http, host api.example.com, port 80, path /v1
//! allowed http://API.example.com/v1/x  same scheme, host and port; /v1 is a path prefix at '/'
//! denied  http://api.example.com@evil  userinfo
//! denied  http://api.example.com.evil  different host
//! denied  http://api.example.com/v10   /v1 is not a prefix at a '/' boundary
//! ```
//!
//! A rule without a port allows any port; a rule without a path allows any
//! path. `tcp://h:p`, `/tcp/h:p` and bare `h:p` all name the same endpoint.

use crate::error::DriverError;
use crate::target::Target;
use reqwest::Url;

/// Scheme, authority and path of a target, normalized for comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
    /// Empty when the endpoint names no path
    path: String,
}

impl Endpoint {
    /// Normalize a parsed target
    pub fn from_target(target: &Target) -> Result<Self, DriverError> {
        let address = target.address();
        let text = if address.contains("://") {
            address.to_string()
        } else {
            format!("{}://{}", target.scheme(), address)
        };
        let url = Url::parse(&text)
            .map_err(|e| DriverError::bad_params(format!("invalid target '{}': {}", text, e)))?;

        if url.scheme() != target.scheme() {
            return Err(DriverError::bad_params(format!(
                "target '{}' does not match scheme '{}'",
                text,
                target.scheme()
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(DriverError::bad_params(format!(
                "target '{}' carries userinfo",
                target.as_str()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DriverError::bad_params(format!("target '{}' has no host", text)))?
            .to_ascii_lowercase();

        let path = match url.path() {
            "" | "/" => String::new(),
            path => path.to_string(),
        };
        // stream addresses are plain host:port, anything after it is suspect
        if target.scheme() == crate::target::DEFAULT_SCHEME
            && (!path.is_empty() || url.query().is_some() || url.fragment().is_some())
        {
            return Err(DriverError::bad_params(format!(
                "stream target '{}' must be host:port",
                address
            )));
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port: url.port_or_known_default(),
            path,
        })
    }

    /// Parse an allow-list entry
    pub fn parse_rule(rule: &str) -> Result<Self, DriverError> {
        Self::from_target(&Target::parse(rule)?)
    }

    /// Whether `self`, read as a rule, admits `target`
    pub fn admits(&self, target: &Endpoint) -> bool {
        if self.scheme != target.scheme || self.host != target.host {
            return false;
        }
        if self.port.is_some() && self.port != target.port {
            return false;
        }
        path_within(&self.path, &target.path)
    }
}

/// `path` equals `prefix` or continues it at a `/` boundary
fn path_within(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Allow-list of target endpoints
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: Vec<Endpoint>,
    restricted: bool,
}

impl AccessPolicy {
    /// Create a policy from allow-list entries; an empty list allows everything.
    ///
    /// Entries that do not parse are dropped with a warning. The policy
    /// stays restricted, so a list of only bad entries admits nothing.
    pub fn new(entries: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut rules = Vec::new();
        let mut restricted = false;
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            restricted = true;
            match Endpoint::parse_rule(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(entry, error = %e, "Ignoring allow-list entry"),
            }
        }
        Self { rules, restricted }
    }

    /// Policy that permits every target
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        !self.restricted
    }

    /// Check whether `target` may be opened
    pub fn is_permitted(&self, target: &Target) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match Endpoint::from_target(target) {
            Ok(endpoint) => self.rules.iter().any(|rule| rule.admits(&endpoint)),
            Err(_) => false,
        }
    }

    /// Like [`is_permitted`](Self::is_permitted) but as a `Result`
    pub fn check(&self, target: &Target) -> Result<(), DriverError> {
        if self.is_permitted(target) {
            Ok(())
        } else {
            Err(DriverError::PermissionDenied(target.as_str().to_string()))
        }
    }
}
