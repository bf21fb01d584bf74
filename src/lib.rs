//! hitflow - web event collector
//!
//! Client-side page/interaction events arrive as JSON batches, are mapped into
//! typed storage items, written to the event table, and rolled up into a
//! per-domain, per-minute hit summary.
//!
//! ```text
//! POST /api/tp2 {"data": [...]}
//!     ↓
//! transport (axum shim, always answers "ok")
//!     ↓
//! EventPipeline ── RecordMapper (per record, URL canonicalizer)
//!     ├─→ BatchWriter        → events table   (batch put)
//!     └─→ SummaryAggregator  → summary table  (atomic add)
//! ```

pub mod collector_core;
pub mod config;
pub mod report;
pub mod sqlite_pragma;
pub mod store;
pub mod transport;

pub use collector_core::{EventPipeline, IngestReport, RawEvent, StorageItem};
pub use config::CollectorConfig;
pub use store::{EventStore, InMemoryStore, SqliteStore, StoreError};
