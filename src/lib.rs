//! kvdb - an embeddable transactional key-value store.
//!
//! This crate is a thin transactional layer over an embedded storage
//! engine. It decides when the engine is opened and closed, wraps every
//! read and write in exactly one engine transaction, serializes concurrent
//! callers, and copies results out of transaction scope before the
//! transaction ends.
//!
//! # Example
//!
//! ```no_run
//! use kvdb::db::Store;
//!
//! let store = Store::open_path("./my_store").unwrap();
//! store.set("user:1", "Alice").unwrap();
//! store.multi_set([("user:2", "Bob"), ("user:3", "Carol")]).unwrap();
//!
//! assert_eq!(store.get("user:1").unwrap(), b"Alice".to_vec());
//! assert_eq!(store.dump().unwrap().len(), 3);
//! store.close().unwrap();
//! ```

pub mod db;
pub mod engine;
pub mod transaction;

pub use db::{Lifecycle, Store, StoreConfig, StoreError, StoreResult};
