//! Storage engine layer for kvdb
//!
//! The engine is an external capability: open a store directory, begin read
//! and write transactions, commit or roll them back. The upper layers
//! (transaction manager, store) only see the traits defined here and never
//! touch a backend crate directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Backend  ──open(path)──▶  StorageEngine     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │   ReadTxn   │               │   WriteTxn  │
//!        │ (snapshot)  │               │  (single)   │
//!        └─────────────┘               └─────────────┘
//! ```
//!
//! # Backends
//!
//! - [`RedbBackend`] - durable, pure-Rust embedded database
//! - [`MemoryBackend`] - volatile, with fault injection

mod error;
pub mod lock;
pub mod memory;
pub mod redb;
mod traits;

pub use error::{EngineError, EngineResult};
pub use lock::DirLock;
pub use memory::{Faults, MemoryBackend, MemoryEngine};
pub use self::redb::{RedbBackend, RedbEngine};
pub use traits::{Backend, OpenMode, ReadTxn, StorageEngine, WriteTxn};
