//! Collector Core - event transformation and aggregation
//!
//! # Architecture
//!
//! ```text
//! RawEvent → canonicalizer (URL → DomainMetadata)
//!     ↓
//! RecordMapper (field policy table, ttm/ttl stamps)
//!     ↓
//! EventPipeline ─┬─→ BatchWriter       → events table
//!                └─→ SummaryAggregator → summary table (atomic add)
//! ```

pub mod batch_writer;
pub mod canonicalizer;
pub mod pipeline;
pub mod record;
pub mod summary;

pub use batch_writer::BatchWriter;
pub use canonicalizer::{canonicalize, CanonicalizeError, DomainMetadata};
pub use pipeline::{EventPipeline, IngestReport};
pub use record::{AttributeValue, EventsPayload, FieldPolicy, MapError, RawEvent, RecordMapper, StorageItem};
pub use summary::{
    AggregationOutcome, SummaryAggregator, SummaryCounter, SummaryError, SummaryIncrement, SummaryKey, TimeSlot,
};
