//! Persistent store for the event and summary tables.
//!
//! The pipeline talks to [`EventStore`] only; [`SqliteStore`] is the
//! production backend and [`InMemoryStore`] stands in for it in tests.

pub mod backend;
pub mod memory_store;
pub mod sqlite_store;

pub use backend::{with_deadline, EventStore, StoreError};
pub use memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
