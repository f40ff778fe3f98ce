//! High-level store API and REPL interface.
//!
//! [`Store`] is the caller-facing handle: it owns a [`ConnectionManager`]
//! that decides when the engine is open, and a transaction manager that
//! wraps every operation in exactly one engine transaction.

mod api;
mod config;
mod connection;
mod error;
mod repl;

pub use api::{format_bytes, Cancellable, Store, StoreStats};
pub use config::{Lifecycle, StoreConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use repl::{parse_statement, Repl, ReplConfig, Statement};
