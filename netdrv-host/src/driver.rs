//! Driver dispatcher
//!
//! Routes `open` to a backend chosen by the target's scheme and every later
//! call to the connection bound to the handle.
//!
//! Per-handle lifecycle:
//!
//! ```text
//! UNOPENED ──open──► OPEN ──close──► CLOSED
//!                    │  ▲
//!                    └──┘ read / write
//! ```
//!
//! Every operation holds the handle's context lock for its whole duration.
//! `close` releases the table entry and shuts the backend down while still
//! holding that lock, so an operation queued behind it finds the context
//! closed and reports a bad handle.

use crate::backend::{Backend, BackendKind, Connection, HttpBackend, TcpBackend};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::handle::HandleTable;
use crate::policy::AccessPolicy;
use crate::target::Target;
use std::collections::HashMap;
use std::sync::Arc;

/// Context stored in the handle table
struct Slot {
    kind: BackendKind,
    target: String,
    /// `None` once the handle has been closed
    connection: Option<Box<dyn Connection>>,
}

/// Host-side network driver shared by all guest calls
///
/// Cloning is cheap; clones share the same handle table.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    config: DriverConfig,
    policy: AccessPolicy,
    backends: HashMap<String, Arc<dyn Backend>>,
    table: HandleTable<Slot>,
}

impl Driver {
    /// Create a driver with the built-in TCP and HTTP backends
    pub fn new(config: DriverConfig) -> Self {
        Self::builder(config)
            .backend(TcpBackend::new())
            .backend(HttpBackend::new())
            .build()
    }

    /// Start a driver with no backends registered
    pub fn builder(config: DriverConfig) -> DriverBuilder {
        DriverBuilder {
            config,
            backends: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Open `target` and return a new handle
    pub async fn open(&self, target: &str, options: &str) -> Result<u32, DriverError> {
        let target = Target::parse(target)?;
        let backend = self
            .inner
            .backends
            .get(target.scheme())
            .cloned()
            .ok_or_else(|| DriverError::DriverNotFound(target.scheme().to_string()))?;
        self.inner.policy.check(&target)?;

        let capacity = self.inner.table.capacity();
        if self.inner.table.len().await >= capacity {
            return Err(DriverError::TooManyHandles(capacity));
        }

        let connection = backend.open(&target, options, &self.inner.config).await?;
        let slot = Slot {
            kind: connection.kind(),
            target: target.as_str().to_string(),
            connection: Some(connection),
        };
        // a concurrent open may have taken the last slot; the rejected
        // connection is dropped, which releases its socket
        let handle = self.inner.table.allocate(slot).await?;

        tracing::info!(
            handle,
            target = %target.as_str(),
            backend = backend.name(),
            "Handle opened"
        );
        Ok(handle)
    }

    /// Read into `buf`. `Ok(0)` marks end of stream for every backend kind.
    pub async fn read(&self, handle: u32, buf: &mut [u8]) -> Result<usize, DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let mut slot = context.lock().await;
        let connection = slot
            .connection
            .as_mut()
            .ok_or(DriverError::BadHandle(handle))?;

        let limit = buf.len().min(self.inner.config.max_transfer);
        let n = connection.read(&mut buf[..limit]).await?;
        tracing::debug!(handle, requested = buf.len(), read = n, "Read");
        Ok(n)
    }

    /// Write from `buf`, possibly partially
    pub async fn write(&self, handle: u32, buf: &[u8]) -> Result<usize, DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let mut slot = context.lock().await;
        let connection = slot
            .connection
            .as_mut()
            .ok_or(DriverError::BadHandle(handle))?;

        let limit = buf.len().min(self.inner.config.max_transfer);
        let n = connection.write(&buf[..limit]).await?;
        tracing::debug!(handle, requested = buf.len(), written = n, "Write");
        Ok(n)
    }

    /// Response status of an HTTP handle
    pub async fn status(&self, handle: u32) -> Result<u16, DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let slot = context.lock().await;
        slot.connection
            .as_ref()
            .ok_or(DriverError::BadHandle(handle))?
            .status()
    }

    /// Raw value of response header `name` on an HTTP handle
    pub async fn header(&self, handle: u32, name: &str) -> Result<Vec<u8>, DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let slot = context.lock().await;
        slot.connection
            .as_ref()
            .ok_or(DriverError::BadHandle(handle))?
            .header(name)
    }

    /// Close a handle and release its backend resources.
    ///
    /// The handle is gone once this returns, even if the backend reported an
    /// error while shutting down.
    pub async fn close(&self, handle: u32) -> Result<(), DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let mut slot = context.lock().await;
        let mut connection = slot
            .connection
            .take()
            .ok_or(DriverError::BadHandle(handle))?;
        self.inner.table.release(handle).await?;

        if let Err(e) = connection.close().await {
            tracing::warn!(handle, error = %e, "Backend reported error on close");
        }
        tracing::info!(handle, target = %slot.target, kind = %slot.kind, "Handle closed");
        Ok(())
    }

    /// Close every open handle
    pub async fn close_all(&self) {
        for (handle, context) in self.inner.table.drain().await {
            let mut slot = context.lock().await;
            if let Some(mut connection) = slot.connection.take() {
                if let Err(e) = connection.close().await {
                    tracing::warn!(handle, error = %e, "Backend reported error on close");
                }
            }
        }
    }

    /// Backend kind bound to a live handle
    pub async fn kind(&self, handle: u32) -> Result<BackendKind, DriverError> {
        let context = self.inner.table.lookup(handle).await?;
        let slot = context.lock().await;
        match slot.connection {
            Some(_) => Ok(slot.kind),
            None => Err(DriverError::BadHandle(handle)),
        }
    }

    /// Whether `handle` is currently open
    pub async fn is_open(&self, handle: u32) -> bool {
        self.inner.table.contains(handle).await
    }

    /// Number of live handles
    pub async fn open_handles(&self) -> usize {
        self.inner.table.len().await
    }

    /// Schemes with a registered backend
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.inner.backends.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

/// Builder for a [`Driver`] with a custom set of backends
pub struct DriverBuilder {
    config: DriverConfig,
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl DriverBuilder {
    /// Register `backend` for each of its schemes, replacing earlier registrations
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        for scheme in backend.schemes() {
            self.backends
                .insert(scheme.to_ascii_lowercase(), backend.clone());
        }
        self
    }

    pub fn build(self) -> Driver {
        let policy = AccessPolicy::new(&self.config.allowed_targets);
        let table = HandleTable::new(self.config.max_handles);
        Driver {
            inner: Arc::new(DriverInner {
                config: self.config,
                policy,
                backends: self.backends,
                table,
            }),
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}
