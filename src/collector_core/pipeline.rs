//! Event pipeline - batch driver for one inbound request
//!
//! ```text
//! [RawEvent] ──map──→ Ok(StorageItem)  ─┬─→ BatchWriter       (one batch put)
//!                 └─→ Err(MapError)     │
//!                      (logged, dropped)└─→ SummaryAggregator (one add per item)
//! ```
//!
//! Both write paths run concurrently and fail independently. Nothing here
//! returns an error to the caller: every failure is logged and counted in the
//! [`IngestReport`].

use super::batch_writer::BatchWriter;
use super::record::{EventsPayload, MapError, RawEvent, RecordMapper, StorageItem};
use super::summary::{AggregationOutcome, SummaryAggregator};
use crate::store::EventStore;
use std::sync::Arc;
use tokio::time::Instant;

/// What happened to one request's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Body could not be decoded; nothing was processed
    pub malformed: bool,
    pub received: usize,
    pub mapped: usize,
    pub rejected: usize,
    /// Items accepted by the event table (0 when the batch put failed)
    pub stored: usize,
    pub store_error: Option<String>,
    pub summary_applied: usize,
    pub summary_failed: usize,
}

impl IngestReport {
    fn malformed() -> Self {
        Self {
            malformed: true,
            ..Self::default()
        }
    }
}

pub struct EventPipeline {
    mapper: RecordMapper,
    writer: BatchWriter,
    aggregator: SummaryAggregator,
}

impl EventPipeline {
    /// Build a pipeline whose write paths share one store handle.
    pub fn new(store: Arc<dyn EventStore>, event_ttl_secs: i64, summary_ttl_secs: i64) -> Self {
        Self {
            mapper: RecordMapper::new(event_ttl_secs),
            writer: BatchWriter::new(store.clone()),
            aggregator: SummaryAggregator::new(store, summary_ttl_secs),
        }
    }

    pub fn mapper(&self) -> &RecordMapper {
        &self.mapper
    }

    /// Map every event, keeping per-record failures as values.
    pub fn map_all(&self, events: &[RawEvent], received_at: i64) -> Vec<Result<StorageItem, MapError>> {
        events
            .iter()
            .map(|event| self.mapper.map_record(event, received_at))
            .collect()
    }

    /// Decode a request body and process it. Undecodable bodies are logged
    /// and reported as malformed.
    pub async fn process_body(&self, body: &[u8], received_at: i64, deadline: Instant) -> IngestReport {
        match EventsPayload::from_json(body) {
            Ok(payload) => self.process(&payload.data, received_at, deadline).await,
            Err(e) => {
                log::warn!("⚠️  Discarding malformed payload ({} bytes): {}", body.len(), e);
                IngestReport::malformed()
            }
        }
    }

    /// Process one batch of events received at `received_at` (epoch seconds).
    /// All store calls are bounded by `deadline`.
    pub async fn process(&self, events: &[RawEvent], received_at: i64, deadline: Instant) -> IngestReport {
        let mut report = IngestReport {
            received: events.len(),
            ..IngestReport::default()
        };

        let mut items = Vec::with_capacity(events.len());
        for (index, result) in self.map_all(events, received_at).into_iter().enumerate() {
            match result {
                Ok(item) => items.push(item),
                Err(e) => {
                    log::warn!("⚠️  Dropping event #{}: {}", index, e);
                    report.rejected += 1;
                }
            }
        }
        report.mapped = items.len();

        let (stored, summary) = tokio::join!(
            self.writer.write_batch(&items, deadline),
            self.aggregator.aggregate(&items, deadline)
        );

        match stored {
            Ok(count) => report.stored = count,
            Err(e) => {
                log::error!("❌ Failed to write {} events: {}", items.len(), e);
                report.store_error = Some(e.to_string());
            }
        }

        let AggregationOutcome { applied, failed } = summary;
        report.summary_applied = applied;
        report.summary_failed = failed;

        log::info!(
            "📥 Ingested batch: {} received, {} stored, {} rejected | summary {} ok / {} failed",
            report.received,
            report.stored,
            report.rejected,
            report.summary_applied,
            report.summary_failed
        );

        report
    }
}
