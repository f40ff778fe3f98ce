//! Transaction management for kvdb.
//!
//! Every store operation runs inside exactly one engine transaction. Read
//! transactions see a snapshot taken when they begin; write transactions
//! are atomic and are committed on success or rolled back on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (Begins transactions, tracks active tx, commit/rollback)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │   TxKind    │       │ CancelToken │
//!  │  (Context)  │       │ read/write  │       │ (advisory)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use kvdb::transaction::TransactionManager;
//!
//! let manager = TransactionManager::new();
//!
//! manager.with_write(&engine, None, |tx| {
//!     tx.set(b"a", b"1")?;
//!     tx.set(b"b", b"2")
//! })?;
//! ```

mod access;
mod cancel;
mod context;
mod error;
mod manager;

pub use access::{ReadAccess, WriteAccess};
pub use cancel::CancelToken;
pub use context::{Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted, TxKind};
pub use error::{TransactionError, TransactionResult};
pub use manager::{ReadTransaction, TransactionManager, WriteTransaction};
