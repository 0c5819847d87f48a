//! netdrv-host: Host-side network driver for sandboxed Wasm guests
//!
//! Guests see `open`, `read`, `write` and `close`, plus `status` and `header`
//! for HTTP responses. They hold integer handles and raw byte buffers;
//! sockets, DNS and HTTP stay on the host.
//!
//! ```text
//! guest ──(ptr,len)──► boundary ──► Driver ──► HandleTable
//!                                     │
//!                                     └──► Backend (tcp | http | custom)
//! ```

pub mod backend;
pub mod boundary;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod policy;
pub mod target;

pub use backend::{Backend, BackendKind, Connection, HttpBackend, TcpBackend};
pub use boundary::add_to_linker;
pub use config::DriverConfig;
pub use driver::{Driver, DriverBuilder};
pub use error::{ConfigError, DriverError};
pub use handle::HandleTable;
pub use netdrv_api::{HttpOptions, ResultCode, TcpOptions, IMPORT_MODULE};
pub use policy::{AccessPolicy, Endpoint};
pub use target::Target;
